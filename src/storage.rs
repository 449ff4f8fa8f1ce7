//! Persistence for the booking export, carrier table and precompute table.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::config::AppConfig;
use crate::error::LoadError;
use crate::estimation::{
    CarrierTypeMap, PrecomputeEntry, PrecomputeTable, parse_precompute_json,
    render_precompute_json,
};
use crate::history::{BookingDataset, parse_bookings_csv, parse_carrier_types_csv};

/// Storage abstraction for everything the estimator reads and the rebuild
/// job writes.
#[async_trait]
pub trait FareStore: Send + Sync {
    /// Load the booking history. An absent export yields an empty dataset.
    async fn load_bookings(&self) -> Result<BookingDataset, LoadError>;

    /// Load the carrier tier table. An absent table yields an empty map.
    async fn load_carrier_types(&self) -> Result<CarrierTypeMap, LoadError>;

    /// Load the persisted precompute table. An absent file yields an empty table.
    async fn load_precompute(&self) -> Result<PrecomputeTable, LoadError>;

    /// Replace the persisted precompute table.
    async fn persist_precompute(&self, entries: &[PrecomputeEntry]) -> Result<(), LoadError>;
}

/// Files on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalFareStore {
    bookings_path: PathBuf,
    carrier_types_path: PathBuf,
    precompute_path: PathBuf,
}

impl LocalFareStore {
    pub fn new(
        bookings_path: impl Into<PathBuf>,
        carrier_types_path: impl Into<PathBuf>,
        precompute_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            bookings_path: bookings_path.into(),
            carrier_types_path: carrier_types_path.into(),
            precompute_path: precompute_path.into(),
        }
    }

    /// Resolve the configured file names against the data directory.
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.data_dir.join(&config.bookings_file),
            config.data_dir.join(&config.carrier_types_file),
            config.data_dir.join(&config.precompute_file),
        )
    }

    pub fn precompute_path(&self) -> &Path {
        &self.precompute_path
    }
}

#[async_trait]
impl FareStore for LocalFareStore {
    async fn load_bookings(&self) -> Result<BookingDataset, LoadError> {
        let Some(bytes) = read_optional(&self.bookings_path).await? else {
            return Ok(BookingDataset::default());
        };
        let dataset = parse_bookings_csv(bytes.as_slice())?;
        if dataset.has_missing_columns() {
            tracing::warn!(
                "Bookings export {} is missing columns: {}",
                self.bookings_path.display(),
                dataset.missing_columns().join(", ")
            );
        } else {
            tracing::info!(
                "Loaded {} booking records from {}",
                dataset.len(),
                self.bookings_path.display()
            );
        }
        Ok(dataset)
    }

    async fn load_carrier_types(&self) -> Result<CarrierTypeMap, LoadError> {
        let Some(bytes) = read_optional(&self.carrier_types_path).await? else {
            return Ok(CarrierTypeMap::default());
        };
        let carriers = parse_carrier_types_csv(bytes.as_slice())?;
        tracing::info!(
            "Loaded {} carrier types from {}",
            carriers.len(),
            self.carrier_types_path.display()
        );
        Ok(carriers)
    }

    async fn load_precompute(&self) -> Result<PrecomputeTable, LoadError> {
        let Some(bytes) = read_optional(&self.precompute_path).await? else {
            return Ok(PrecomputeTable::default());
        };
        let table = PrecomputeTable::from_entries(parse_precompute_json(&bytes)?)?;
        tracing::info!(
            "Loaded precompute table from {}: {} entries ({} priced)",
            self.precompute_path.display(),
            table.len(),
            table.priced_len()
        );
        Ok(table)
    }

    async fn persist_precompute(&self, entries: &[PrecomputeEntry]) -> Result<(), LoadError> {
        let json = render_precompute_json(entries)?;

        if let Some(parent) = self.precompute_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }

        // Write beside the target and rename so readers never see a partial file.
        let staging = staging_path(&self.precompute_path);
        tokio::fs::write(&staging, json)
            .await
            .map_err(|e| io_error(&staging, e))?;
        if let Err(e) = tokio::fs::rename(&staging, &self.precompute_path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(io_error(&self.precompute_path, e));
        }

        tracing::info!(
            "Persisted {} precompute entries to {}",
            entries.len(),
            self.precompute_path.display()
        );
        Ok(())
    }
}

/// A staging file name unique to this process and write.
fn staging_path(target: &Path) -> PathBuf {
    static NEXT: AtomicU64 = AtomicU64::new(0);

    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(
        ".{}.{}.tmp",
        std::process::id(),
        NEXT.fetch_add(1, Ordering::Relaxed)
    ));
    target.with_file_name(name)
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, LoadError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::warn!("{} not found, starting empty", path.display());
            Ok(None)
        }
        Err(e) => Err(io_error(path, e)),
    }
}

fn io_error(path: &Path, source: std::io::Error) -> LoadError {
    LoadError::Io {
        path: path.to_path_buf(),
        source,
    }
}

//! Precompute rebuilds: one-shot and scheduled.
//!
//! A rebuild reloads the booking history and carrier table, recomputes every
//! cell off the async runtime, persists the table and then swaps the new
//! snapshot in. Requests running during a rebuild keep reading the old one.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::EstimatorConfig;
use crate::error::LoadError;
use crate::estimation::{
    PrecomputeEntry, PrecomputeTable, Snapshot, SnapshotHandle, rebuild_precompute_table,
};
use crate::storage::FareStore;

/// What a rebuild produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RebuildSummary {
    /// Cells written, priced or not.
    pub entries: usize,
    /// Cells holding a price.
    pub priced_entries: usize,
    pub destinations: usize,
}

impl RebuildSummary {
    fn of(entries: &[PrecomputeEntry]) -> Self {
        let mut destinations: Vec<&str> = entries.iter().map(|e| e.destination_iata.as_str()).collect();
        destinations.dedup();
        Self {
            entries: entries.len(),
            priced_entries: entries.iter().filter(|e| e.adjusted_avg_price.is_some()).count(),
            destinations: destinations.len(),
        }
    }
}

/// Reload, rebuild, persist and swap.
///
/// The snapshot is only replaced once the table has been persisted, so the
/// served table never runs ahead of the file on disk. Rebuilds against the
/// same handle run one at a time. An export lacking required columns fails
/// the rebuild and leaves both the file and the snapshot untouched.
pub async fn rebuild_and_swap(
    store: &dyn FareStore,
    handle: &SnapshotHandle,
    config: Arc<EstimatorConfig>,
) -> Result<RebuildSummary, LoadError> {
    let _rebuild = handle.begin_rebuild().await;

    let started = Instant::now();
    let dataset = store.load_bookings().await?;
    if dataset.has_missing_columns() {
        return Err(LoadError::MissingColumns(dataset.missing_columns().to_vec()));
    }
    let carriers = store.load_carrier_types().await?;

    let (dataset, carriers, entries) = tokio::task::spawn_blocking(move || {
        let entries = rebuild_precompute_table(&dataset, &carriers, &config);
        (dataset, carriers, entries)
    })
    .await
    .map_err(|e| LoadError::Task(e.to_string()))?;

    store.persist_precompute(&entries).await?;

    let summary = RebuildSummary::of(&entries);
    let table = PrecomputeTable::from_entries(entries)?;
    handle.replace_all(Snapshot::new(dataset, carriers, table));

    tracing::info!(
        "Rebuild finished in {:?}: {} entries, {} priced, {} destinations",
        started.elapsed(),
        summary.entries,
        summary.priced_entries,
        summary.destinations
    );
    Ok(summary)
}

/// Configuration for scheduled rebuilds.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Interval between rebuilds.
    pub interval: Duration,
    /// Whether scheduled rebuilds run at all.
    pub enabled: bool,
    /// Maximum consecutive failures before the scheduler stops.
    pub max_failures: u32,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(24 * 60 * 60),
            enabled: true,
            max_failures: 3,
        }
    }
}

impl RefreshConfig {
    /// Enabled with `interval`, or disabled when there is none.
    pub fn from_interval(interval: Option<Duration>) -> Self {
        match interval {
            Some(interval) => Self::default().with_interval(interval),
            None => Self::default().disabled(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Periodic rebuild loop.
pub struct RefreshRunner {
    config: RefreshConfig,
    store: Arc<dyn FareStore>,
    handle: Arc<SnapshotHandle>,
    estimator: Arc<EstimatorConfig>,
    consecutive_failures: u32,
}

impl RefreshRunner {
    pub fn new(
        config: RefreshConfig,
        store: Arc<dyn FareStore>,
        handle: Arc<SnapshotHandle>,
        estimator: Arc<EstimatorConfig>,
    ) -> Self {
        Self {
            config,
            store,
            handle,
            estimator,
            consecutive_failures: 0,
        }
    }

    /// Run the refresh loop.
    ///
    /// Runs until `max_failures` consecutive rebuilds fail.
    pub async fn run(&mut self) {
        if !self.config.enabled {
            tracing::info!("Scheduled rebuilds are disabled, not starting loop");
            return;
        }

        tracing::info!(
            "Starting rebuild loop with interval {:?}",
            self.config.interval
        );

        let mut interval = tokio::time::interval(self.config.interval);
        // The snapshot was just loaded at startup
        interval.tick().await;

        loop {
            interval.tick().await;

            match self.run_once().await {
                Ok(_) => {
                    self.consecutive_failures = 0;
                }
                Err(e) => {
                    tracing::error!("Scheduled rebuild failed: {}", e);
                    self.consecutive_failures += 1;

                    if self.consecutive_failures >= self.config.max_failures {
                        tracing::error!(
                            "Scheduled rebuilds stopped after {} consecutive failures",
                            self.consecutive_failures
                        );
                        break;
                    }
                }
            }
        }
    }

    /// Run a single rebuild.
    pub async fn run_once(&self) -> Result<RebuildSummary, LoadError> {
        rebuild_and_swap(self.store.as_ref(), &self.handle, Arc::clone(&self.estimator)).await
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    use super::*;
    use crate::estimation::{CarrierTypeMap, CellKey, Lookup};
    use crate::history::BookingDataset;
    use crate::storage::LocalFareStore;

    const BOOKINGS: &str = "\
PD_Origin,PD_Destination,PD_Departure_Date,created,PD_Carrier,PD_Passengers,Price Per Passenger (AUD)
SYD,LAX,2024-06-10,2024-03-01,QANTAS,2,1200
MEL,LAX,2024-06-02,2024-03-08,Jetstar,1,800
BNE,DPS,2024-01-05,2023-11-02,Jetstar,1,450
";

    fn seeded_store(dir: &TempDir) -> Arc<LocalFareStore> {
        std::fs::write(dir.path().join("bookings.csv"), BOOKINGS).unwrap();
        std::fs::write(
            dir.path().join("airline_type.csv"),
            "Airline,Type\nQANTAS,Premium\nJetstar,Budget\n",
        )
        .unwrap();
        Arc::new(LocalFareStore::new(
            dir.path().join("bookings.csv"),
            dir.path().join("airline_type.csv"),
            dir.path().join("precomputed_jan_dec.json"),
        ))
    }

    struct OfflineStore {
        attempts: AtomicU32,
    }

    #[async_trait]
    impl FareStore for OfflineStore {
        async fn load_bookings(&self) -> Result<BookingDataset, LoadError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(LoadError::Task("store offline".to_string()))
        }

        async fn load_carrier_types(&self) -> Result<CarrierTypeMap, LoadError> {
            Ok(CarrierTypeMap::default())
        }

        async fn load_precompute(&self) -> Result<PrecomputeTable, LoadError> {
            Ok(PrecomputeTable::default())
        }

        async fn persist_precompute(&self, _entries: &[PrecomputeEntry]) -> Result<(), LoadError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_rebuild_persists_and_swaps() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir);
        let handle = SnapshotHandle::default();

        let summary = rebuild_and_swap(
            store.as_ref(),
            &handle,
            Arc::new(EstimatorConfig::default()),
        )
        .await
        .unwrap();

        assert_eq!(
            summary,
            RebuildSummary {
                entries: 288,
                priced_entries: 2,
                destinations: 2,
            }
        );

        let snapshot = handle.load();
        assert_eq!(snapshot.dataset.len(), 3);
        assert_eq!(
            snapshot.table.lookup(&CellKey::new("LAX", 6, 3).unwrap()),
            Lookup::Hit(dec!(1100))
        );

        let persisted = store.load_precompute().await.unwrap();
        assert_eq!(persisted.len(), 288);
        assert_eq!(persisted.priced_len(), 2);
    }

    #[tokio::test]
    async fn test_failed_rebuild_keeps_old_snapshot() {
        let handle = SnapshotHandle::default();
        let before = handle.load();
        let store = OfflineStore {
            attempts: AtomicU32::new(0),
        };

        let result = rebuild_and_swap(&store, &handle, Arc::new(EstimatorConfig::default())).await;

        assert!(matches!(result, Err(LoadError::Task(_))));
        assert!(Arc::ptr_eq(&before, &handle.load()));
    }

    #[tokio::test]
    async fn test_export_missing_columns_keeps_table() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir);
        let handle = SnapshotHandle::default();
        let config = Arc::new(EstimatorConfig::default());

        rebuild_and_swap(store.as_ref(), &handle, Arc::clone(&config))
            .await
            .unwrap();
        let before = handle.load();

        std::fs::write(
            dir.path().join("bookings.csv"),
            BOOKINGS.replacen("PD_Origin", "Origin", 1),
        )
        .unwrap();
        let result = rebuild_and_swap(store.as_ref(), &handle, config).await;

        match result {
            Err(LoadError::MissingColumns(columns)) => {
                assert_eq!(columns, vec!["PD_Origin".to_string()]);
            }
            other => panic!("expected missing columns, got {:?}", other),
        }
        assert!(Arc::ptr_eq(&before, &handle.load()));

        let persisted = store.load_precompute().await.unwrap();
        assert_eq!(persisted.len(), 288);
        assert_eq!(persisted.priced_len(), 2);
    }

    #[tokio::test]
    async fn test_rebuilds_wait_for_each_other() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir);
        let handle = SnapshotHandle::default();
        let config = Arc::new(EstimatorConfig::default());

        let in_progress = handle.begin_rebuild().await;
        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            rebuild_and_swap(store.as_ref(), &handle, Arc::clone(&config)),
        )
        .await;
        assert!(blocked.is_err());
        assert!(handle.load().table.is_empty());

        drop(in_progress);
        let summary = rebuild_and_swap(store.as_ref(), &handle, config)
            .await
            .unwrap();
        assert_eq!(summary.entries, 288);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_overlapping_rebuilds_all_succeed() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir);
        let handle = Arc::new(SnapshotHandle::default());
        let config = Arc::new(EstimatorConfig::default());

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                let handle = Arc::clone(&handle);
                let config = Arc::clone(&config);
                tokio::spawn(async move {
                    rebuild_and_swap(store.as_ref(), &handle, config).await
                })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().entries, 288);
        }

        let persisted = store.load_precompute().await.unwrap();
        assert_eq!(persisted.len(), 288);
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_runner_stops_after_max_failures() {
        let store = Arc::new(OfflineStore {
            attempts: AtomicU32::new(0),
        });
        let config = RefreshConfig::default()
            .with_interval(Duration::from_millis(5))
            .with_max_failures(2);
        let mut runner = RefreshRunner::new(
            config,
            store.clone(),
            Arc::new(SnapshotHandle::default()),
            Arc::new(EstimatorConfig::default()),
        );

        tokio::time::timeout(Duration::from_secs(5), runner.run())
            .await
            .unwrap();

        assert_eq!(runner.consecutive_failures(), 2);
        assert_eq!(store.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_disabled_runner_returns_immediately() {
        let store = Arc::new(OfflineStore {
            attempts: AtomicU32::new(0),
        });
        let mut runner = RefreshRunner::new(
            RefreshConfig::from_interval(None),
            store.clone(),
            Arc::new(SnapshotHandle::default()),
            Arc::new(EstimatorConfig::default()),
        );

        runner.run().await;
        assert_eq!(store.attempts.load(Ordering::SeqCst), 0);
    }
}

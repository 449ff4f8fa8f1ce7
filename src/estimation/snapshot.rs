//! Atomically swappable estimation state.
//!
//! The booking dataset, carrier map and precompute table are never mutated in
//! place. A refresh builds new values and swaps the whole [`Snapshot`] behind
//! the handle; in-flight requests keep the `Arc` they started with.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard};

use crate::estimation::carrier::CarrierTypeMap;
use crate::estimation::precompute::PrecomputeTable;
use crate::history::BookingDataset;

/// One consistent view of everything an estimate reads.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub dataset: Arc<BookingDataset>,
    pub carriers: Arc<CarrierTypeMap>,
    pub table: Arc<PrecomputeTable>,
    /// When this snapshot was assembled.
    pub built_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(dataset: BookingDataset, carriers: CarrierTypeMap, table: PrecomputeTable) -> Self {
        Self {
            dataset: Arc::new(dataset),
            carriers: Arc::new(carriers),
            table: Arc::new(table),
            built_at: Utc::now(),
        }
    }

    pub fn empty() -> Self {
        Self::new(
            BookingDataset::default(),
            CarrierTypeMap::default(),
            PrecomputeTable::default(),
        )
    }
}

/// Shared handle to the live snapshot.
#[derive(Debug)]
pub struct SnapshotHandle {
    current: RwLock<Arc<Snapshot>>,
    rebuild: Mutex<()>,
}

impl SnapshotHandle {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
            rebuild: Mutex::new(()),
        }
    }

    /// The live snapshot. Hold on to it for the duration of a request.
    pub fn load(&self) -> Arc<Snapshot> {
        // The lock only guards an Arc swap, so a poisoned lock still holds a
        // complete snapshot.
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replace everything at once.
    pub fn replace_all(&self, snapshot: Snapshot) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(snapshot);
        tracing::info!(
            "Swapped snapshot: {} records, {} carriers, {} table entries",
            guard.dataset.len(),
            guard.carriers.len(),
            guard.table.len()
        );
    }

    /// Exclusive right to rebuild. Held across reload, persist and swap so
    /// concurrent rebuilds neither interleave their writes nor swap out of order.
    pub async fn begin_rebuild(&self) -> MutexGuard<'_, ()> {
        self.rebuild.lock().await
    }
}

impl Default for SnapshotHandle {
    fn default() -> Self {
        Self::new(Snapshot::empty())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::estimation::precompute::PrecomputeEntry;
    use crate::history::BookingRecord;

    fn with_price(price: &str) -> Snapshot {
        let table = PrecomputeTable::from_entries(vec![PrecomputeEntry {
            destination_iata: "LAX".to_string(),
            departure_month: 6,
            booking_month: 3,
            adjusted_avg_price: Some(price.parse().unwrap()),
        }])
        .unwrap();
        Snapshot::new(BookingDataset::default(), CarrierTypeMap::default(), table)
    }

    #[test]
    fn test_readers_keep_their_snapshot() {
        let handle = SnapshotHandle::new(with_price("100"));

        let before = handle.load();
        handle.replace_all(with_price("200"));
        let after = handle.load();

        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(before.table.to_entries()[0].adjusted_avg_price, Some("100".parse().unwrap()));
        assert_eq!(after.table.to_entries()[0].adjusted_avg_price, Some("200".parse().unwrap()));
    }

    #[test]
    fn test_replace_all_swaps_every_part() {
        let handle = SnapshotHandle::new(with_price("100"));

        let record = BookingRecord::new(
            "SYD",
            "LAX",
            NaiveDate::from_ymd_opt(2024, 6, 10).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            "QANTAS",
            "1200",
        );
        handle.replace_all(Snapshot::new(
            BookingDataset::new(vec![record]),
            CarrierTypeMap::default(),
            PrecomputeTable::default(),
        ));

        let current = handle.load();
        assert_eq!(current.dataset.len(), 1);
        assert!(current.table.is_empty());
    }

    #[test]
    fn test_concurrent_readers_see_whole_snapshots() {
        let handle = Arc::new(SnapshotHandle::new(with_price("100")));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let handle = Arc::clone(&handle);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let snapshot = handle.load();
                        assert_eq!(snapshot.table.len(), 1);
                    }
                })
            })
            .collect();

        for i in 0..100 {
            handle.replace_all(with_price(&format!("{}", 100 + i)));
        }
        for reader in readers {
            reader.join().unwrap();
        }
    }

    #[tokio::test]
    async fn test_rebuild_right_is_exclusive() {
        let handle = SnapshotHandle::default();

        let first = handle.begin_rebuild().await;
        assert!(handle.rebuild.try_lock().is_err());
        drop(first);
        assert!(handle.rebuild.try_lock().is_ok());
    }
}

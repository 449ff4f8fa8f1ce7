//! The precompute table: cached per-cell prices and the job that builds it.
//!
//! The persisted form is a JSON array of
//! `{destination_iata, departure_month, booking_month, adjusted_avg_price}`
//! with one entry for each of the 144 month pairs of every observed
//! destination. `adjusted_avg_price: null` records that the cell had no data
//! at rebuild time.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::EstimatorConfig;
use crate::error::LoadError;
use crate::estimation::aggregator::WeightedAggregator;
use crate::estimation::carrier::CarrierTypeMap;
use crate::estimation::cell::CellKey;
use crate::history::{BookingDataset, BookingRecord};

/// One persisted cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecomputeEntry {
    pub destination_iata: String,
    pub departure_month: u32,
    pub booking_month: u32,
    #[serde(with = "rust_decimal::serde::arbitrary_precision_option")]
    pub adjusted_avg_price: Option<Decimal>,
}

/// Result of looking a cell up in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// A price was cached.
    Hit(Decimal),
    /// The cell was computed but had no data at rebuild time.
    CachedNull,
    /// The cell is not in the table.
    Miss,
}

/// In-memory precompute table keyed by cell.
#[derive(Debug, Clone, Default)]
pub struct PrecomputeTable {
    cells: HashMap<CellKey, Option<Decimal>>,
}

impl PrecomputeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from persisted entries, validating every key.
    pub fn from_entries(entries: Vec<PrecomputeEntry>) -> Result<Self, LoadError> {
        let mut cells = HashMap::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            let key = CellKey::new(
                &entry.destination_iata,
                entry.departure_month,
                entry.booking_month,
            )
            .map_err(|e| LoadError::InvalidEntry {
                index,
                reason: e.to_string(),
            })?;
            cells.insert(key, entry.adjusted_avg_price);
        }
        Ok(Self { cells })
    }

    /// Entries in canonical (destination, departure, booking) order.
    pub fn to_entries(&self) -> Vec<PrecomputeEntry> {
        let ordered: BTreeMap<&CellKey, &Option<Decimal>> = self.cells.iter().collect();
        ordered
            .into_iter()
            .map(|(key, price)| entry_for(key, *price))
            .collect()
    }

    pub fn lookup(&self, key: &CellKey) -> Lookup {
        match self.cells.get(key) {
            Some(Some(price)) => Lookup::Hit(*price),
            Some(None) => Lookup::CachedNull,
            None => Lookup::Miss,
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Number of cells holding a price.
    pub fn priced_len(&self) -> usize {
        self.cells.values().filter(|p| p.is_some()).count()
    }
}

fn entry_for(key: &CellKey, price: Option<Decimal>) -> PrecomputeEntry {
    PrecomputeEntry {
        destination_iata: key.destination().to_string(),
        departure_month: key.departure_month(),
        booking_month: key.booking_month(),
        adjusted_avg_price: price,
    }
}

/// Run the aggregator over every cell of every observed destination.
///
/// Cells are unfiltered and priced for a single traveler; traveler scaling
/// happens at lookup time. Destinations are those reached from a domestic
/// origin. Output is ordered by destination, departure month, booking month,
/// so identical datasets produce identical tables.
pub fn rebuild_precompute_table(
    dataset: &BookingDataset,
    carriers: &CarrierTypeMap,
    config: &EstimatorConfig,
) -> Vec<PrecomputeEntry> {
    let aggregator = WeightedAggregator::new(config, carriers);

    let mut cells: BTreeMap<CellKey, Vec<&BookingRecord>> = BTreeMap::new();
    let mut destinations: BTreeSet<&str> = BTreeSet::new();
    for record in dataset
        .records()
        .iter()
        .filter(|r| config.is_domestic_origin(&r.origin_code))
    {
        destinations.insert(&record.destination_code);
        cells.entry(CellKey::of_record(record)).or_default().push(record);
    }

    let mut entries = Vec::with_capacity(destinations.len() * 144);
    for destination in &destinations {
        for departure_month in 1..=12 {
            for booking_month in 1..=12 {
                let key = CellKey::of_parts(destination, departure_month, booking_month);
                let price = cells
                    .get(&key)
                    .and_then(|rows| aggregator.aggregate_rows(rows.iter().copied(), None, 1).price());
                entries.push(entry_for(&key, price));
            }
        }
    }

    tracing::info!(
        "Rebuilt precompute table: {} entries across {} destinations ({} priced)",
        entries.len(),
        destinations.len(),
        entries.iter().filter(|e| e.adjusted_avg_price.is_some()).count()
    );
    entries
}

/// Parse a persisted table.
pub fn parse_precompute_json(bytes: &[u8]) -> Result<Vec<PrecomputeEntry>, LoadError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Render a table for persistence.
pub fn render_precompute_json(entries: &[PrecomputeEntry]) -> Result<String, LoadError> {
    Ok(serde_json::to_string_pretty(entries)?)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::estimation::carrier::CarrierTier;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn dataset() -> BookingDataset {
        BookingDataset::new(vec![
            BookingRecord::new("SYD", "LAX", date(2024, 6, 10), date(2024, 3, 1), "QANTAS", "$1,200.00")
                .with_passengers(2),
            BookingRecord::new("MEL", "LAX", date(2024, 6, 2), date(2024, 3, 8), "Jetstar", "800"),
            BookingRecord::new("BNE", "DPS", date(2024, 1, 5), date(2023, 11, 2), "Jetstar", "450")
                .with_return_date(date(2024, 1, 12)),
            BookingRecord::new("AKL", "NRT", date(2024, 2, 5), date(2023, 12, 2), "Air NZ", "990"),
        ])
    }

    fn carriers() -> CarrierTypeMap {
        [("QANTAS", CarrierTier::Premium), ("Jetstar", CarrierTier::Budget)]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_rebuild_covers_every_cell() {
        let entries = rebuild_precompute_table(&dataset(), &carriers(), &EstimatorConfig::default());

        // NRT is only reached from a non-domestic origin.
        assert_eq!(entries.len(), 2 * 144);
        assert_eq!(entries[0].destination_iata, "DPS");
        assert_eq!((entries[0].departure_month, entries[0].booking_month), (1, 1));
        assert_eq!(entries[143].destination_iata, "DPS");
        assert_eq!((entries[143].departure_month, entries[143].booking_month), (12, 12));
        assert_eq!(entries[144].destination_iata, "LAX");

        let priced: Vec<&PrecomputeEntry> = entries
            .iter()
            .filter(|e| e.adjusted_avg_price.is_some())
            .collect();
        assert_eq!(priced.len(), 2);

        // DPS departs January, booked November, round trip halved.
        assert_eq!(priced[0].destination_iata, "DPS");
        assert_eq!((priced[0].departure_month, priced[0].booking_month), (1, 11));
        assert_eq!(priced[0].adjusted_avg_price, Some(dec!(225)));

        // LAX June/March: (1200 × 3 + 800 × 1) / 4
        assert_eq!(priced[1].destination_iata, "LAX");
        assert_eq!((priced[1].departure_month, priced[1].booking_month), (6, 3));
        assert_eq!(priced[1].adjusted_avg_price, Some(dec!(1100)));
    }

    #[test]
    fn test_rebuild_is_deterministic() {
        let config = EstimatorConfig::default();
        let first = render_precompute_json(&rebuild_precompute_table(&dataset(), &carriers(), &config)).unwrap();

        let mut reversed: Vec<BookingRecord> = dataset().records().to_vec();
        reversed.reverse();
        let second = render_precompute_json(&rebuild_precompute_table(
            &BookingDataset::new(reversed),
            &carriers(),
            &config,
        ))
        .unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_rebuild_of_empty_dataset_is_empty() {
        let entries = rebuild_precompute_table(
            &BookingDataset::default(),
            &carriers(),
            &EstimatorConfig::default(),
        );
        assert!(entries.is_empty());
    }

    #[test]
    fn test_json_round_trip_is_exact() {
        let entries = vec![
            PrecomputeEntry {
                destination_iata: "LAX".to_string(),
                departure_month: 6,
                booking_month: 3,
                adjusted_avg_price: Some(dec!(1100.37)),
            },
            PrecomputeEntry {
                destination_iata: "LAX".to_string(),
                departure_month: 6,
                booking_month: 4,
                adjusted_avg_price: None,
            },
        ];

        let json = render_precompute_json(&entries).unwrap();
        assert!(json.contains("\"adjusted_avg_price\": 1100.37"));
        assert!(json.contains("\"adjusted_avg_price\": null"));

        let parsed = parse_precompute_json(json.as_bytes()).unwrap();
        assert_eq!(parsed, entries);
    }

    #[test]
    fn test_parse_accepts_float_prices() {
        let json = br#"[{"destination_iata":"LAX","departure_month":6,"booking_month":3,"adjusted_avg_price":987.654321}]"#;
        let parsed = parse_precompute_json(json).unwrap();
        assert_eq!(parsed[0].adjusted_avg_price, Some(dec!(987.654321)));
    }

    #[test]
    fn test_table_lookup() {
        let entries = rebuild_precompute_table(&dataset(), &carriers(), &EstimatorConfig::default());
        let table = PrecomputeTable::from_entries(entries.clone()).unwrap();

        assert_eq!(table.len(), 288);
        assert_eq!(table.priced_len(), 2);
        assert_eq!(
            table.lookup(&CellKey::new("LAX", 6, 3).unwrap()),
            Lookup::Hit(dec!(1100))
        );
        assert_eq!(
            table.lookup(&CellKey::new("LAX", 6, 4).unwrap()),
            Lookup::CachedNull
        );
        assert_eq!(
            table.lookup(&CellKey::new("SFO", 6, 3).unwrap()),
            Lookup::Miss
        );
        assert_eq!(table.to_entries(), entries);
    }

    #[test]
    fn test_invalid_entries_rejected() {
        let entries = vec![PrecomputeEntry {
            destination_iata: "LAX".to_string(),
            departure_month: 13,
            booking_month: 1,
            adjusted_avg_price: None,
        }];
        assert!(matches!(
            PrecomputeTable::from_entries(entries),
            Err(LoadError::InvalidEntry { index: 0, .. })
        ));
    }
}

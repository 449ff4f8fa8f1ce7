//! Per-booking-month price estimation.
//!
//! For every booking month (always all twelve) the service consults the
//! precompute table first and falls back to the weighted aggregator when the
//! cell is absent or was cached without a price.

use std::fmt;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Serialize, Serializer};

use crate::config::EstimatorConfig;
use crate::error::EstimateError;
use crate::estimation::aggregator::{CellEstimate, CellQuery, NoPriceReason, WeightedAggregator};
use crate::estimation::carrier::TierFilter;
use crate::estimation::cell::{CellKey, normalize_destination, validate_month};
use crate::estimation::precompute::Lookup;
use crate::estimation::snapshot::{Snapshot, SnapshotHandle};

/// Booking months covered by every estimate.
pub const BOOKING_MONTHS: std::ops::RangeInclusive<u32> = 1..=12;

/// A validated estimation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EstimateRequest {
    destination: String,
    departure_month: u32,
    travelers: u32,
    tier_filter: Option<TierFilter>,
}

impl EstimateRequest {
    /// Validate and build a request. Fails before any aggregation work.
    pub fn new(
        destination: &str,
        departure_month: u32,
        travelers: u32,
        tier_filter: Option<TierFilter>,
    ) -> Result<Self, EstimateError> {
        if travelers == 0 {
            return Err(EstimateError::InvalidTravelerCount);
        }
        Ok(Self {
            destination: normalize_destination(destination)?,
            departure_month: validate_month("departure_month", departure_month)?,
            travelers,
            tier_filter,
        })
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn departure_month(&self) -> u32 {
        self.departure_month
    }

    pub fn travelers(&self) -> u32 {
        self.travelers
    }

    pub fn tier_filter(&self) -> Option<TierFilter> {
        self.tier_filter
    }

    fn cell_query(&self, booking_month: u32) -> CellQuery {
        CellQuery {
            cell: CellKey::of_parts(&self.destination, self.departure_month, booking_month),
            tier_filter: self.tier_filter,
            travelers: self.travelers,
        }
    }
}

/// Where a month's price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceSource {
    Precomputed,
    Realtime,
    /// Fallback ran and found no price.
    Fallback(NoPriceReason),
}

impl PriceSource {
    pub fn tag(&self) -> String {
        match self {
            Self::Precomputed => "precomputed".to_string(),
            Self::Realtime => "realtime".to_string(),
            Self::Fallback(reason) => format!("fallback_{}", reason),
        }
    }
}

impl From<CellEstimate> for PriceSource {
    fn from(estimate: CellEstimate) -> Self {
        match estimate {
            CellEstimate::Priced(_) => Self::Realtime,
            CellEstimate::NoPrice(reason) => Self::Fallback(reason),
        }
    }
}

impl fmt::Display for PriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

impl Serialize for PriceSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.tag())
    }
}

/// Price for one booking month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlyBreakdown {
    pub booking_month: u32,
    #[serde(with = "rust_decimal::serde::arbitrary_precision_option")]
    pub adjusted_avg_price: Option<Decimal>,
    pub source: PriceSource,
}

/// Full response: the echoed request plus the per-month breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceEstimate {
    pub destination_iata: String,
    pub departure_month: u32,
    pub num_travelers: u32,
    pub airline_filter: Option<TierFilter>,
    pub analysis: Vec<MonthlyBreakdown>,
}

/// Estimate against an explicit snapshot.
pub fn estimate_with(
    snapshot: &Snapshot,
    config: &EstimatorConfig,
    request: &EstimateRequest,
) -> PriceEstimate {
    let aggregator = WeightedAggregator::new(config, &snapshot.carriers);

    let analysis = BOOKING_MONTHS
        .map(|booking_month| {
            let query = request.cell_query(booking_month);
            // A cached price too large to scale by travelers is treated as a miss.
            let cached = match snapshot.table.lookup(&query.cell) {
                Lookup::Hit(price) => price.checked_mul(Decimal::from(request.travelers)),
                Lookup::CachedNull | Lookup::Miss => None,
            };
            let (price, source) = match cached {
                Some(price) => (Some(price), PriceSource::Precomputed),
                None => {
                    let estimate = aggregator.estimate(&snapshot.dataset, &query);
                    (estimate.price(), PriceSource::from(estimate))
                }
            };
            tracing::debug!("{}: {}", query.cell, source);
            MonthlyBreakdown {
                booking_month,
                adjusted_avg_price: price,
                source,
            }
        })
        .collect();

    PriceEstimate {
        destination_iata: request.destination.clone(),
        departure_month: request.departure_month,
        num_travelers: request.travelers,
        airline_filter: request.tier_filter,
        analysis,
    }
}

/// Estimation entry point holding the live snapshot.
pub struct EstimationService {
    snapshot: Arc<SnapshotHandle>,
    config: Arc<EstimatorConfig>,
}

impl EstimationService {
    pub fn new(snapshot: Arc<SnapshotHandle>, config: Arc<EstimatorConfig>) -> Self {
        Self { snapshot, config }
    }

    /// Validate the inputs and estimate every booking month.
    pub fn estimate(
        &self,
        destination: &str,
        departure_month: u32,
        travelers: u32,
        tier_filter: Option<TierFilter>,
    ) -> Result<PriceEstimate, EstimateError> {
        let request = EstimateRequest::new(destination, departure_month, travelers, tier_filter)?;
        Ok(self.estimate_request(&request))
    }

    pub fn estimate_request(&self, request: &EstimateRequest) -> PriceEstimate {
        let snapshot = self.snapshot.load();
        let estimate = estimate_with(&snapshot, &self.config, request);

        let precomputed = estimate
            .analysis
            .iter()
            .filter(|m| m.source == PriceSource::Precomputed)
            .count();
        tracing::info!(
            "Estimated {} departing month {} for {} traveler(s): {} precomputed, {} fallback",
            request.destination,
            request.departure_month,
            request.travelers,
            precomputed,
            estimate.analysis.len() - precomputed
        );
        estimate
    }

    pub fn snapshot(&self) -> &Arc<SnapshotHandle> {
        &self.snapshot
    }

    pub fn config(&self) -> &Arc<EstimatorConfig> {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::estimation::carrier::{CarrierTier, CarrierTypeMap};
    use crate::estimation::precompute::{PrecomputeEntry, PrecomputeTable, rebuild_precompute_table};
    use crate::history::{BookingDataset, BookingRecord};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn dataset() -> BookingDataset {
        BookingDataset::new(vec![
            BookingRecord::new("SYD", "LAX", date(2024, 6, 10), date(2024, 3, 1), "QANTAS", "$1,200.00")
                .with_passengers(2),
            BookingRecord::new("MEL", "LAX", date(2024, 6, 2), date(2024, 4, 8), "Jetstar", "800"),
            BookingRecord::new("SYD", "LAX", date(2024, 6, 20), date(2024, 4, 9), "QANTAS", "1000"),
        ])
    }

    fn carriers() -> CarrierTypeMap {
        [("QANTAS", CarrierTier::Premium), ("Jetstar", CarrierTier::Budget)]
            .into_iter()
            .collect()
    }

    fn entry(booking_month: u32, price: Option<Decimal>) -> PrecomputeEntry {
        PrecomputeEntry {
            destination_iata: "LAX".to_string(),
            departure_month: 6,
            booking_month,
            adjusted_avg_price: price,
        }
    }

    fn service(table: PrecomputeTable) -> EstimationService {
        let snapshot = Snapshot::new(dataset(), carriers(), table);
        EstimationService::new(
            Arc::new(SnapshotHandle::new(snapshot)),
            Arc::new(EstimatorConfig::default()),
        )
    }

    #[test]
    fn test_all_twelve_booking_months_are_reported() {
        let estimate = service(PrecomputeTable::new())
            .estimate("lax", 6, 1, None)
            .unwrap();

        assert_eq!(estimate.destination_iata, "LAX");
        let months: Vec<u32> = estimate.analysis.iter().map(|m| m.booking_month).collect();
        assert_eq!(months, (1..=12).collect::<Vec<_>>());
    }

    #[test]
    fn test_precomputed_price_scaled_by_travelers() {
        let table = PrecomputeTable::from_entries(vec![entry(3, Some(dec!(950.25)))]).unwrap();
        let estimate = service(table).estimate("LAX", 6, 3, None).unwrap();

        let march = &estimate.analysis[2];
        assert_eq!(march.adjusted_avg_price, Some(dec!(2850.75)));
        assert_eq!(march.source, PriceSource::Precomputed);
    }

    #[test]
    fn test_cached_null_falls_back() {
        let table = PrecomputeTable::from_entries(vec![entry(3, None)]).unwrap();
        let estimate = service(table).estimate("LAX", 6, 1, None).unwrap();

        let march = &estimate.analysis[2];
        assert_eq!(march.adjusted_avg_price, Some(dec!(1200)));
        assert_eq!(march.source, PriceSource::Realtime);
    }

    #[test]
    fn test_unscalable_cached_price_falls_back() {
        let huge = Decimal::from_str_exact("70000000000000000000000000000").unwrap();
        let table = PrecomputeTable::from_entries(vec![entry(3, Some(huge))]).unwrap();
        let estimate = service(table).estimate("LAX", 6, 2, None).unwrap();

        let march = &estimate.analysis[2];
        assert_eq!(march.adjusted_avg_price, Some(dec!(2400)));
        assert_eq!(march.source, PriceSource::Realtime);
    }

    #[test]
    fn test_fallback_matches_direct_aggregation() {
        let config = EstimatorConfig::default();
        let snapshot = Snapshot::new(dataset(), carriers(), PrecomputeTable::new());

        for filter in [None, Some(TierFilter::Premium), Some(TierFilter::Budget)] {
            let request = EstimateRequest::new("LAX", 6, 2, filter).unwrap();
            let estimate = estimate_with(&snapshot, &config, &request);

            for month in &estimate.analysis {
                let direct = WeightedAggregator::new(&config, &snapshot.carriers).estimate(
                    &snapshot.dataset,
                    &CellQuery {
                        cell: CellKey::new("LAX", 6, month.booking_month).unwrap(),
                        tier_filter: filter,
                        travelers: 2,
                    },
                );
                assert_eq!(month.adjusted_avg_price, direct.price());
                assert_eq!(month.source, PriceSource::from(direct));
            }
        }
    }

    #[test]
    fn test_rebuilt_table_agrees_with_fallback() {
        let config = EstimatorConfig::default();
        let entries = rebuild_precompute_table(&dataset(), &carriers(), &config);
        let cached = service(PrecomputeTable::from_entries(entries).unwrap())
            .estimate("LAX", 6, 2, None)
            .unwrap();
        let live = service(PrecomputeTable::new())
            .estimate("LAX", 6, 2, None)
            .unwrap();

        for (c, l) in cached.analysis.iter().zip(&live.analysis) {
            assert_eq!(c.adjusted_avg_price, l.adjusted_avg_price);
        }
        assert_eq!(cached.analysis[3].source, PriceSource::Precomputed);
        assert_eq!(live.analysis[3].source, PriceSource::Realtime);
    }

    #[test]
    fn test_absence_is_not_an_error() {
        let estimate = service(PrecomputeTable::new())
            .estimate("ZZZ", 1, 1, None)
            .unwrap();
        assert!(estimate.analysis.iter().all(|m| {
            m.adjusted_avg_price.is_none()
                && m.source == PriceSource::Fallback(NoPriceReason::NoData)
        }));
        assert_eq!(estimate.analysis[0].source.tag(), "fallback_no_data");
    }

    #[test]
    fn test_tier_filter_reason_is_distinct() {
        let estimate = service(PrecomputeTable::new())
            .estimate("LAX", 6, 1, Some(TierFilter::Budget))
            .unwrap();

        // March only has a QANTAS fare.
        assert_eq!(
            estimate.analysis[2].source,
            PriceSource::Fallback(NoPriceReason::NoDataAfterFilter)
        );
        assert_eq!(
            estimate.analysis[2].source.tag(),
            "fallback_no_data_after_filter"
        );
        // April has a Jetstar fare.
        assert_eq!(estimate.analysis[3].adjusted_avg_price, Some(dec!(800)));
    }

    #[test]
    fn test_invalid_input_fails_fast() {
        let svc = service(PrecomputeTable::new());
        assert_eq!(
            svc.estimate("", 6, 1, None),
            Err(EstimateError::EmptyDestination)
        );
        assert_eq!(
            svc.estimate("LAX", 13, 1, None),
            Err(EstimateError::InvalidMonth {
                field: "departure_month",
                value: 13
            })
        );
        assert_eq!(
            svc.estimate("LAX", 6, 0, None),
            Err(EstimateError::InvalidTravelerCount)
        );
    }

    #[test]
    fn test_serialized_shape() {
        let table = PrecomputeTable::from_entries(vec![entry(3, Some(dec!(1100.00)))]).unwrap();
        let estimate = service(table)
            .estimate("LAX", 6, 1, Some(TierFilter::Premium))
            .unwrap();
        let json = serde_json::to_string(&estimate).unwrap();

        assert!(json.starts_with(
            r#"{"destination_iata":"LAX","departure_month":6,"num_travelers":1,"airline_filter":"premium","analysis":[{"booking_month":1,"adjusted_avg_price":null,"source":"fallback_no_data"}"#
        ));
        assert!(json.contains(
            r#"{"booking_month":3,"adjusted_avg_price":1100.00,"source":"precomputed"}"#
        ));
    }
}

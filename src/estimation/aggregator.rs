//! Weighted fare aggregation for a single cell.
//!
//! This is the fallback used when the precompute table has no price, and the
//! same routine the rebuild job runs for every cell. For one cell it:
//! 1. Keeps rows from domestic origins that fall into the cell
//! 2. Normalizes fares and halves round trips
//! 3. Applies the optional tier filter
//! 4. Weights rows by passengers × carrier weight (× recency, if enabled)
//! 5. Optionally trims fares outside a band around the median
//! 6. Reduces to a weighted mean, rounded to cents, scaled by travelers

use std::fmt;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::{EstimatorConfig, OutlierPolicy};
use crate::estimation::carrier::{CarrierTypeMap, TierFilter};
use crate::estimation::cell::CellKey;
use crate::history::{BookingDataset, BookingRecord};

/// Decimal places kept in aggregated prices.
pub const PRICE_SCALE: u32 = 2;

/// Why a cell produced no price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoPriceReason {
    /// No usable record falls into the cell.
    NoData,
    /// Rows existed but none matched the requested tier.
    NoDataAfterFilter,
    /// Outlier trimming removed every row.
    NoDataAfterOutlierRemoval,
    /// The surviving weights sum to zero.
    ZeroWeight,
    /// The dataset was loaded without its required columns.
    MissingColumns,
    /// No dataset records are loaded at all.
    EmptyDataset,
    /// The weighted values exceed the decimal range.
    Overflow,
}

impl NoPriceReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoData => "no_data",
            Self::NoDataAfterFilter => "no_data_after_filter",
            Self::NoDataAfterOutlierRemoval => "no_data_after_outlier_removal",
            Self::ZeroWeight => "zero_weight",
            Self::MissingColumns => "missing_columns",
            Self::EmptyDataset => "empty_dataset",
            Self::Overflow => "overflow",
        }
    }
}

impl fmt::Display for NoPriceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of aggregating one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellEstimate {
    Priced(Decimal),
    NoPrice(NoPriceReason),
}

impl CellEstimate {
    pub fn price(&self) -> Option<Decimal> {
        match self {
            Self::Priced(price) => Some(*price),
            Self::NoPrice(_) => None,
        }
    }
}

/// Parameters of a single-cell aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellQuery {
    pub cell: CellKey,
    pub tier_filter: Option<TierFilter>,
    /// Multiplier applied to the final per-person price. At least 1.
    pub travelers: u32,
}

impl CellQuery {
    /// An unfiltered, single-traveler query, as the rebuild job runs it.
    pub fn unfiltered(cell: CellKey) -> Self {
        Self {
            cell,
            tier_filter: None,
            travelers: 1,
        }
    }
}

/// A row that survived normalization, with its weight.
#[derive(Debug, Clone, Copy)]
struct WeightedFare {
    fare: Decimal,
    weight: Decimal,
}

/// The fallback aggregation algorithm, bound to one carrier map and config.
pub struct WeightedAggregator<'a> {
    config: &'a EstimatorConfig,
    carriers: &'a CarrierTypeMap,
}

impl<'a> WeightedAggregator<'a> {
    pub fn new(config: &'a EstimatorConfig, carriers: &'a CarrierTypeMap) -> Self {
        Self { config, carriers }
    }

    /// Aggregate one cell over the full dataset.
    pub fn estimate(&self, dataset: &BookingDataset, query: &CellQuery) -> CellEstimate {
        if dataset.has_missing_columns() {
            return CellEstimate::NoPrice(NoPriceReason::MissingColumns);
        }
        if dataset.is_empty() {
            return CellEstimate::NoPrice(NoPriceReason::EmptyDataset);
        }

        let rows = dataset
            .records()
            .iter()
            .filter(|r| self.config.is_domestic_origin(&r.origin_code) && query.cell.matches(r));
        self.aggregate_rows(rows, query.tier_filter, query.travelers)
    }

    /// Aggregate rows already known to belong to a single cell.
    pub(crate) fn aggregate_rows<'r>(
        &self,
        rows: impl IntoIterator<Item = &'r BookingRecord>,
        tier_filter: Option<TierFilter>,
        travelers: u32,
    ) -> CellEstimate {
        let rows: Vec<(&BookingRecord, Decimal)> = rows
            .into_iter()
            .filter_map(|r| r.one_way_fare().map(|fare| (r, fare)))
            .collect();
        if rows.is_empty() {
            return CellEstimate::NoPrice(NoPriceReason::NoData);
        }

        let rows: Vec<(&BookingRecord, Decimal)> = match tier_filter {
            Some(filter) => rows
                .into_iter()
                .filter(|(r, _)| filter.matches(self.carriers.tier_of(&r.carrier_id)))
                .collect(),
            None => rows,
        };
        if rows.is_empty() {
            return CellEstimate::NoPrice(NoPriceReason::NoDataAfterFilter);
        }

        // Rows whose weighted fare leaves the decimal range are dropped like
        // unparsable fares.
        let oldest_year = rows.iter().map(|(r, _)| r.booking_year()).min();
        let mut weighted: Vec<WeightedFare> = rows
            .iter()
            .filter_map(|(r, fare)| {
                let row = self
                    .row_weight(r, oldest_year)
                    .filter(|weight| fare.checked_mul(*weight).is_some())
                    .map(|weight| WeightedFare {
                        fare: *fare,
                        weight,
                    });
                if row.is_none() {
                    tracing::debug!(
                        "Dropping {} fare {} for {} passenger(s): weighted value overflows",
                        r.carrier_id,
                        fare,
                        r.passenger_count
                    );
                }
                row
            })
            .collect();
        if weighted.is_empty() {
            return CellEstimate::NoPrice(NoPriceReason::Overflow);
        }

        if let OutlierPolicy::MedianBand { tolerance } = self.config.outlier_policy {
            let fares: Vec<Decimal> = weighted.iter().map(|w| w.fare).collect();
            // A band too wide to represent keeps every row.
            if let Some(median) = median(&fares)
                && let Some(band) = median.checked_mul(tolerance)
            {
                weighted.retain(|w| (w.fare - median).abs() <= band);
            }
            if weighted.is_empty() {
                return CellEstimate::NoPrice(NoPriceReason::NoDataAfterOutlierRemoval);
            }
        }

        let mean = match weighted_mean(&weighted) {
            Ok(mean) => mean,
            Err(reason) => return CellEstimate::NoPrice(reason),
        };
        match mean.checked_mul(Decimal::from(travelers)) {
            Some(price) => CellEstimate::Priced(price),
            None => CellEstimate::NoPrice(NoPriceReason::Overflow),
        }
    }

    fn row_weight(&self, record: &BookingRecord, oldest_year: Option<i32>) -> Option<Decimal> {
        let base = Decimal::from(record.passenger_count)
            .checked_mul(self.carriers.weight_of(&record.carrier_id))?;
        match oldest_year {
            Some(oldest) if self.config.recency_weighting => {
                base.checked_mul(Decimal::from(record.booking_year() - oldest + 1))
            }
            _ => Some(base),
        }
    }
}

/// `Σ(fare × weight) / Σ(weight)`, rounded to exactly [`PRICE_SCALE`] places.
///
/// Decimal sums are exact, so the result does not depend on row order. Every
/// term is non-negative, so the partial sums only grow and whether they
/// overflow does not depend on row order either.
fn weighted_mean(rows: &[WeightedFare]) -> Result<Decimal, NoPriceReason> {
    let mut total_weight = Decimal::ZERO;
    let mut weighted_sum = Decimal::ZERO;
    for row in rows {
        let term = row
            .fare
            .checked_mul(row.weight)
            .ok_or(NoPriceReason::Overflow)?;
        total_weight = total_weight
            .checked_add(row.weight)
            .ok_or(NoPriceReason::Overflow)?;
        weighted_sum = weighted_sum
            .checked_add(term)
            .ok_or(NoPriceReason::Overflow)?;
    }
    if total_weight.is_zero() {
        return Err(NoPriceReason::ZeroWeight);
    }

    let mut mean = weighted_sum
        .checked_div(total_weight)
        .ok_or(NoPriceReason::Overflow)?
        .round_dp(PRICE_SCALE);
    mean.rescale(PRICE_SCALE);
    Ok(mean)
}

fn median(values: &[Decimal]) -> Option<Decimal> {
    let mut values = values.to_vec();
    values.sort();
    let mid = values.len() / 2;
    match values.len() {
        0 => None,
        n if n % 2 == 0 => {
            // lo + (hi - lo) / 2 stays in range for any pair of fares
            let (lo, hi) = (values[mid - 1], values[mid]);
            Some(lo + (hi - lo) / Decimal::TWO)
        }
        _ => Some(values[mid]),
    }
}

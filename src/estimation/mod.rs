//! Fare estimation.
//!
//! Estimates come from two tiers:
//! - A precompute table of per-cell prices rebuilt from the booking history
//! - A weighted aggregator that prices a cell directly from the history when
//!   the table has nothing for it
//!
//! Both tiers share one aggregation routine, so a cached price and a live
//! fallback for the same cell always agree.

mod aggregator;
mod carrier;
mod cell;
mod precompute;
mod service;
mod snapshot;

pub use aggregator::{CellEstimate, CellQuery, NoPriceReason, PRICE_SCALE, WeightedAggregator};
pub use carrier::{CarrierTier, CarrierTypeMap, PREMIUM_WEIGHT, TierFilter};
pub use cell::{CellKey, normalize_destination, validate_month};
pub use precompute::{
    Lookup, PrecomputeEntry, PrecomputeTable, parse_precompute_json, rebuild_precompute_table,
    render_precompute_json,
};
pub use service::{
    BOOKING_MONTHS, EstimateRequest, EstimationService, MonthlyBreakdown, PriceEstimate,
    PriceSource, estimate_with,
};
pub use snapshot::{Snapshot, SnapshotHandle};

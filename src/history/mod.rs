//! Historical booking data.
//!
//! Holds the raw observations the fallback aggregator and the precompute
//! rebuild run over:
//! - Booking records and the immutable dataset wrapper
//! - CSV parsing for booking exports and the carrier type table

mod loader;
mod record;

pub use loader::{
    REQUIRED_COLUMNS, parse_bookings_csv, parse_carrier_types_csv, parse_date,
};
pub use record::{BookingDataset, BookingRecord, normalize_fare, normalize_passenger_count};

//! The (destination, departure month, booking month) cell key.

use std::fmt;

use crate::error::EstimateError;
use crate::history::BookingRecord;

/// Validate a calendar month number.
pub fn validate_month(field: &'static str, value: u32) -> Result<u32, EstimateError> {
    if (1..=12).contains(&value) {
        Ok(value)
    } else {
        Err(EstimateError::InvalidMonth { field, value })
    }
}

/// Normalize a destination code: trimmed and upper-cased, never empty.
pub fn normalize_destination(raw: &str) -> Result<String, EstimateError> {
    let code = raw.trim();
    if code.is_empty() {
        return Err(EstimateError::EmptyDestination);
    }
    Ok(code.to_ascii_uppercase())
}

/// The unit of both caching and aggregation.
///
/// Ordering is destination first, then departure month, then booking month,
/// which is also the order of the persisted precompute table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey {
    destination: String,
    departure_month: u32,
    booking_month: u32,
}

impl CellKey {
    /// Build a validated key.
    pub fn new(
        destination: &str,
        departure_month: u32,
        booking_month: u32,
    ) -> Result<Self, EstimateError> {
        Ok(Self {
            destination: normalize_destination(destination)?,
            departure_month: validate_month("departure_month", departure_month)?,
            booking_month: validate_month("booking_month", booking_month)?,
        })
    }

    /// Build a key from parts already known to be valid.
    pub(crate) fn of_parts(destination: &str, departure_month: u32, booking_month: u32) -> Self {
        debug_assert!((1..=12).contains(&departure_month) && (1..=12).contains(&booking_month));
        Self {
            destination: destination.to_string(),
            departure_month,
            booking_month,
        }
    }

    /// The cell a record falls into.
    pub fn of_record(record: &BookingRecord) -> Self {
        Self {
            destination: record.destination_code.clone(),
            departure_month: record.departure_month(),
            booking_month: record.booking_month(),
        }
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn departure_month(&self) -> u32 {
        self.departure_month
    }

    pub fn booking_month(&self) -> u32 {
        self.booking_month
    }

    /// Whether a record belongs to this cell.
    pub fn matches(&self, record: &BookingRecord) -> bool {
        record.destination_code == self.destination
            && record.departure_month() == self.departure_month
            && record.booking_month() == self.booking_month
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/dep={}/booked={}",
            self.destination, self.departure_month, self.booking_month
        )
    }
}

//! Historical booking observations.

use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;

/// One historical booking observation.
///
/// The fare is kept exactly as exported (`"$1,200.00"`, `"850"`, ...). It is
/// normalized on use by [`BookingRecord::fare_amount`], so a record with an
/// unparsable fare still loads and is only dropped from aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRecord {
    pub origin_code: String,
    pub destination_code: String,
    pub departure_date: NaiveDate,
    /// When the fare was purchased or observed.
    pub booking_date: NaiveDate,
    pub carrier_id: String,
    /// Always at least 1, see [`normalize_passenger_count`].
    pub passenger_count: u32,
    /// Raw fare text as exported.
    pub fare: String,
    /// Present for round trips.
    pub return_date: Option<NaiveDate>,
}

impl BookingRecord {
    /// Create a one-way, single-passenger record.
    pub fn new(
        origin_code: impl Into<String>,
        destination_code: impl Into<String>,
        departure_date: NaiveDate,
        booking_date: NaiveDate,
        carrier_id: impl Into<String>,
        fare: impl Into<String>,
    ) -> Self {
        Self {
            origin_code: origin_code.into(),
            destination_code: destination_code.into(),
            departure_date,
            booking_date,
            carrier_id: carrier_id.into(),
            passenger_count: 1,
            fare: fare.into(),
            return_date: None,
        }
    }

    /// Set the passenger count (0 is normalized to 1).
    pub fn with_passengers(mut self, count: u32) -> Self {
        self.passenger_count = normalize_passenger_count(Some(count));
        self
    }

    /// Mark the record as a round trip returning on `date`.
    pub fn with_return_date(mut self, date: NaiveDate) -> Self {
        self.return_date = Some(date);
        self
    }

    pub fn is_round_trip(&self) -> bool {
        self.return_date.is_some()
    }

    pub fn departure_month(&self) -> u32 {
        self.departure_date.month()
    }

    pub fn booking_month(&self) -> u32 {
        self.booking_date.month()
    }

    pub fn booking_year(&self) -> i32 {
        self.booking_date.year()
    }

    /// The fare as a decimal, or `None` if it cannot be parsed.
    pub fn fare_amount(&self) -> Option<Decimal> {
        normalize_fare(&self.fare)
    }

    /// The fare for a single leg: round-trip fares are halved.
    pub fn one_way_fare(&self) -> Option<Decimal> {
        let fare = self.fare_amount()?;
        if self.is_round_trip() {
            Some(fare / Decimal::TWO)
        } else {
            Some(fare)
        }
    }
}

/// Strip currency symbols and separators from a fare and parse it.
///
/// Only ASCII digits and `.` survive. An empty remainder or one that still
/// doesn't parse (e.g. `"1.2.3"`) yields `None`; it is never coerced to zero.
pub fn normalize_fare(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    Decimal::from_str(&cleaned).ok()
}

/// Missing or zero passenger counts become 1.
pub fn normalize_passenger_count(raw: Option<u32>) -> u32 {
    raw.filter(|n| *n > 0).unwrap_or(1)
}

/// An immutable, wholesale-replaced set of booking records.
#[derive(Debug, Clone, Default)]
pub struct BookingDataset {
    records: Vec<BookingRecord>,
    /// Required source columns that were absent when the dataset was loaded.
    missing_columns: Vec<String>,
}

impl BookingDataset {
    pub fn new(records: Vec<BookingRecord>) -> Self {
        Self {
            records,
            missing_columns: Vec::new(),
        }
    }

    /// A dataset whose source lacked required columns.
    pub fn with_missing_columns(missing_columns: Vec<String>) -> Self {
        Self {
            records: Vec::new(),
            missing_columns,
        }
    }

    pub fn records(&self) -> &[BookingRecord] {
        &self.records
    }

    pub fn missing_columns(&self) -> &[String] {
        &self.missing_columns
    }

    pub fn has_missing_columns(&self) -> bool {
        !self.missing_columns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<BookingRecord> for BookingDataset {
    fn from_iter<I: IntoIterator<Item = BookingRecord>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

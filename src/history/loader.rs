//! CSV parsing for booking exports and the carrier type table.

use std::io::Read;

use chrono::{DateTime, NaiveDate};
use serde::Deserialize;

use crate::error::LoadError;
use crate::estimation::{CarrierTier, CarrierTypeMap};
use crate::history::record::{BookingDataset, BookingRecord, normalize_passenger_count};

pub const COL_ORIGIN: &str = "PD_Origin";
pub const COL_DESTINATION: &str = "PD_Destination";
pub const COL_DEPARTURE_DATE: &str = "PD_Departure_Date";
pub const COL_BOOKING_DATE: &str = "created";
pub const COL_CARRIER: &str = "PD_Carrier";
pub const COL_FARE: &str = "Price Per Passenger (AUD)";
pub const COL_PASSENGERS: &str = "PD_Passengers";
pub const COL_RETURN_DATE: &str = "PD_Return_Date";

/// Columns a booking export must carry for aggregation to run.
pub const REQUIRED_COLUMNS: [&str; 6] = [
    COL_ORIGIN,
    COL_DESTINATION,
    COL_DEPARTURE_DATE,
    COL_BOOKING_DATE,
    COL_CARRIER,
    COL_FARE,
];

struct ColumnIndex {
    origin: usize,
    destination: usize,
    departure_date: usize,
    booking_date: usize,
    carrier: usize,
    fare: usize,
    passengers: Option<usize>,
    return_date: Option<usize>,
}

/// Parse a booking export.
///
/// A header lacking required columns is not an error: the dataset comes back
/// empty with [`BookingDataset::missing_columns`] populated. Rows whose
/// departure or booking date can't be parsed are skipped.
pub fn parse_bookings_csv<R: Read>(reader: R) -> Result<BookingDataset, LoadError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv_reader.headers()?.clone();
    let find = |name: &str| headers.iter().position(|h| h == name);

    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|name| find(*name).is_none())
        .map(|name| name.to_string())
        .collect();
    if !missing.is_empty() {
        tracing::warn!("Booking export is missing columns: {}", missing.join(", "));
        return Ok(BookingDataset::with_missing_columns(missing));
    }

    // All required columns were found above.
    let idx = ColumnIndex {
        origin: find(COL_ORIGIN).unwrap_or_default(),
        destination: find(COL_DESTINATION).unwrap_or_default(),
        departure_date: find(COL_DEPARTURE_DATE).unwrap_or_default(),
        booking_date: find(COL_BOOKING_DATE).unwrap_or_default(),
        carrier: find(COL_CARRIER).unwrap_or_default(),
        fare: find(COL_FARE).unwrap_or_default(),
        passengers: find(COL_PASSENGERS),
        return_date: find(COL_RETURN_DATE),
    };

    let mut records = Vec::new();
    let mut skipped = 0usize;

    for (line, row) in csv_reader.records().enumerate() {
        let row = row?;
        let field = |i: usize| row.get(i).unwrap_or("");

        let (Some(departure_date), Some(booking_date)) = (
            parse_date(field(idx.departure_date)),
            parse_date(field(idx.booking_date)),
        ) else {
            tracing::debug!("Skipping booking row {} with unparsable dates", line + 2);
            skipped += 1;
            continue;
        };

        let passengers = idx
            .passengers
            .and_then(|i| parse_passengers(field(i)));

        records.push(BookingRecord {
            origin_code: field(idx.origin).to_ascii_uppercase(),
            destination_code: field(idx.destination).to_ascii_uppercase(),
            departure_date,
            booking_date,
            carrier_id: field(idx.carrier).to_string(),
            passenger_count: normalize_passenger_count(passengers),
            fare: field(idx.fare).to_string(),
            return_date: idx.return_date.and_then(|i| parse_date(field(i))),
        });
    }

    tracing::info!(
        "Parsed {} booking records ({} skipped)",
        records.len(),
        skipped
    );
    Ok(BookingDataset::new(records))
}

#[derive(Debug, Deserialize)]
struct CarrierTypeRow {
    #[serde(rename = "Airline")]
    airline: String,
    #[serde(rename = "Type", default)]
    tier: String,
}

/// Parse the `Airline,Type` table. Unrecognised types map to `unknown`.
pub fn parse_carrier_types_csv<R: Read>(reader: R) -> Result<CarrierTypeMap, LoadError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut map = CarrierTypeMap::new();
    for row in csv_reader.deserialize::<CarrierTypeRow>() {
        let row = row?;
        if row.airline.is_empty() {
            continue;
        }
        map.insert(row.airline, CarrierTier::parse_lenient(&row.tier));
    }

    tracing::info!("Loaded carrier types for {} carriers", map.len());
    Ok(map)
}

/// Parse a date or timestamp, keeping the calendar date as written.
///
/// Accepts `2024-03-01`, `2024-03-01T10:22:33Z`, `2024-03-01 10:22:33.123 UTC`
/// and similar ISO-prefixed forms.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.date_naive());
    }
    match raw.as_bytes().get(10) {
        Some(b'T') | Some(b' ') => NaiveDate::parse_from_str(raw.get(..10)?, "%Y-%m-%d").ok(),
        _ => None,
    }
}

/// Passenger counts sometimes export as floats (`"2.0"`).
fn parse_passengers(raw: &str) -> Option<u32> {
    if let Ok(n) = raw.parse::<u32>() {
        return Some(n);
    }
    raw.parse::<f64>()
        .ok()
        .filter(|n| n.is_finite() && *n >= 1.0 && n.fract() == 0.0)
        .and_then(|n| u32::try_from(n as u64).ok())
}

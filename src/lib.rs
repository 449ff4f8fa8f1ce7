//! Expected air-fare estimation.
//!
//! Prices come from a precompute table of weighted historical averages,
//! with a live weighted aggregation over the booking history whenever the
//! table has nothing for a cell.

pub mod cli;
pub mod config;
pub mod error;
pub mod estimation;
pub mod history;
pub mod refresh;
pub mod server;
pub mod storage;

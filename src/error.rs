//! Error types for farecast.

use std::path::PathBuf;

/// Input validation failures for estimation requests.
///
/// These are the only conditions that abort an estimate. Missing fare data
/// is never an error; it comes back as a no-price result with a reason.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EstimateError {
    #[error("destination code must not be empty")]
    EmptyDestination,

    #[error("{field} must be between 1 and 12, got {value}")]
    InvalidMonth { field: &'static str, value: u32 },

    #[error("traveler count must be at least 1")]
    InvalidTravelerCount,

    #[error("unknown airline filter '{0}', expected 'premium' or 'budget'")]
    InvalidTierFilter(String),
}

/// Failures while loading or persisting datasets and tables.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("booking export is missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("invalid precompute entry {index}: {reason}")]
    InvalidEntry { index: usize, reason: String },

    #[error("rebuild task failed: {0}")]
    Task(String),
}

/// Failures bringing up the HTTP surface.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Configuration parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

//! Configuration for the estimator and the service around it.
//!
//! Values come from `FARECAST_*` environment variables (a `.env` file is
//! loaded first by the binary). Every setting has a default, so an empty
//! environment yields a working local configuration.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;

use crate::error::ConfigError;

/// Default relative tolerance around the cell median for outlier trimming.
pub const DEFAULT_OUTLIER_TOLERANCE: Decimal = dec!(0.4);

/// Origins treated as domestic when none are configured.
pub const DEFAULT_DOMESTIC_ORIGINS: &[&str] = &[
    "SYD", "MEL", "BNE", "PER", "ADL", "CBR", "HBA", "DRW", "OOL", "CNS", "AVV", "MCY", "NTL",
    "TSV", "PPP", "MQL", "ABX", "TMW", "ARM", "GLT", "LST", "PHE", "KTA", "KGI", "KNS", "HVB",
    "BME", "AYQ", "MOV", "PLO", "GOV", "MNG", "BHS", "ISA", "GET", "WEI", "RMA", "GFF", "BHQ",
];

/// Outlier rejection applied to a cell before the weighted mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutlierPolicy {
    /// Every surviving row contributes.
    #[default]
    Disabled,
    /// Drop rows whose fare deviates from the cell median by more than
    /// `tolerance × median`.
    MedianBand { tolerance: Decimal },
}

impl FromStr for OutlierPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        let (name, arg) = match s.split_once(':') {
            Some((name, arg)) => (name, Some(arg)),
            None => (s.as_str(), None),
        };
        match (name, arg) {
            ("disabled" | "none" | "off", None) => Ok(Self::Disabled),
            ("median_band" | "median", None) => Ok(Self::MedianBand {
                tolerance: DEFAULT_OUTLIER_TOLERANCE,
            }),
            ("median_band" | "median", Some(arg)) => {
                let tolerance = Decimal::from_str(arg.trim())
                    .map_err(|e| format!("invalid tolerance '{}': {}", arg, e))?;
                if tolerance.is_sign_negative() {
                    return Err(format!("tolerance must not be negative, got {}", tolerance));
                }
                Ok(Self::MedianBand { tolerance })
            }
            _ => Err(format!(
                "invalid outlier policy '{}', expected 'disabled' or 'median_band[:tolerance]'",
                s
            )),
        }
    }
}

/// Aggregation settings shared by the fallback path and the rebuild job.
#[derive(Debug, Clone)]
pub struct EstimatorConfig {
    /// Origins whose bookings are considered at all.
    pub domestic_origins: BTreeSet<String>,
    pub outlier_policy: OutlierPolicy,
    /// Weight rows by booking year (oldest year in the cell = 1).
    pub recency_weighting: bool,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            domestic_origins: DEFAULT_DOMESTIC_ORIGINS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            outlier_policy: OutlierPolicy::Disabled,
            recency_weighting: false,
        }
    }
}

impl EstimatorConfig {
    pub fn is_domestic_origin(&self, origin: &str) -> bool {
        self.domestic_origins.contains(origin)
    }

    /// Replace the origin allow-list.
    pub fn with_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.domestic_origins = origins
            .into_iter()
            .map(|s| s.as_ref().trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        self
    }

    pub fn with_outlier_policy(mut self, policy: OutlierPolicy) -> Self {
        self.outlier_policy = policy;
        self
    }

    pub fn with_recency_weighting(mut self, enabled: bool) -> Self {
        self.recency_weighting = enabled;
        self
    }

    /// Read overrides through `lookup` (normally the process environment).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(origins) = lookup("FARECAST_DOMESTIC_ORIGINS") {
            config = config.with_origins(origins.split(','));
            if config.domestic_origins.is_empty() {
                return Err(invalid("FARECAST_DOMESTIC_ORIGINS", "no origins listed"));
            }
        }
        if let Some(policy) = lookup("FARECAST_OUTLIER_POLICY") {
            config.outlier_policy = policy
                .parse()
                .map_err(|e: String| invalid("FARECAST_OUTLIER_POLICY", &e))?;
        }
        if let Some(flag) = lookup("FARECAST_RECENCY_WEIGHTING") {
            config.recency_weighting = parse_bool("FARECAST_RECENCY_WEIGHTING", &flag)?;
        }

        Ok(config)
    }
}

/// Process-level configuration for the binary.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Directory holding the bookings export, carrier table and precompute file.
    pub data_dir: PathBuf,
    pub bookings_file: String,
    pub carrier_types_file: String,
    pub precompute_file: String,
    pub bind_addr: SocketAddr,
    /// Interval between scheduled rebuilds. `None` disables the scheduler.
    pub refresh_interval: Option<Duration>,
    /// Required `x-api-key` for every route except `/health`, if set.
    pub api_key: Option<SecretString>,
    pub estimator: EstimatorConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            bookings_file: "bookings.csv".to_string(),
            carrier_types_file: "airline_type.csv".to_string(),
            precompute_file: "precomputed_jan_dec.json".to_string(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            refresh_interval: None,
            api_key: None,
            estimator: EstimatorConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through `lookup`; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self {
            estimator: EstimatorConfig::from_lookup(&lookup)?,
            ..Self::default()
        };

        if let Some(dir) = lookup("FARECAST_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(name) = lookup("FARECAST_BOOKINGS_FILE") {
            config.bookings_file = name;
        }
        if let Some(name) = lookup("FARECAST_CARRIER_TYPES_FILE") {
            config.carrier_types_file = name;
        }
        if let Some(name) = lookup("FARECAST_PRECOMPUTE_FILE") {
            config.precompute_file = name;
        }
        if let Some(addr) = lookup("FARECAST_BIND_ADDR") {
            config.bind_addr = addr
                .parse()
                .map_err(|e: std::net::AddrParseError| invalid("FARECAST_BIND_ADDR", &e.to_string()))?;
        }
        if let Some(secs) = lookup("FARECAST_REFRESH_INTERVAL_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|e: std::num::ParseIntError| {
                invalid("FARECAST_REFRESH_INTERVAL_SECS", &e.to_string())
            })?;
            config.refresh_interval = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(key) = lookup("FARECAST_API_KEY") {
            config.api_key = Some(SecretString::from(key));
        }

        Ok(config)
    }
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(invalid(key, &format!("expected a boolean, got '{}'", other))),
    }
}

//! Carrier tier classification and weighting.

use std::collections::HashMap;
use std::fmt;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::EstimateError;

/// Weight applied to premium carriers' fares.
pub const PREMIUM_WEIGHT: Decimal = dec!(1.5);

/// Coarse carrier classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CarrierTier {
    Premium,
    Budget,
    #[default]
    Unknown,
}

impl CarrierTier {
    /// Parse a tier from the carrier type table. Anything unrecognised is
    /// `Unknown`.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "premium" => Self::Premium,
            "budget" => Self::Budget,
            _ => Self::Unknown,
        }
    }

    /// Multiplicative weight for this tier.
    pub fn weight(&self) -> Decimal {
        match self {
            Self::Premium => PREMIUM_WEIGHT,
            Self::Budget | Self::Unknown => Decimal::ONE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Premium => "premium",
            Self::Budget => "budget",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for CarrierTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A requested tier restriction for fallback aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierFilter {
    Premium,
    Budget,
}

impl TierFilter {
    pub fn matches(&self, tier: CarrierTier) -> bool {
        matches!(
            (self, tier),
            (Self::Premium, CarrierTier::Premium) | (Self::Budget, CarrierTier::Budget)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Premium => "premium",
            Self::Budget => "budget",
        }
    }
}

impl std::str::FromStr for TierFilter {
    type Err = EstimateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "premium" => Ok(Self::Premium),
            "budget" => Ok(Self::Budget),
            _ => Err(EstimateError::InvalidTierFilter(s.to_string())),
        }
    }
}

impl fmt::Display for TierFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Carrier id to tier lookup, loaded once per refresh cycle.
#[derive(Debug, Clone, Default)]
pub struct CarrierTypeMap {
    tiers: HashMap<String, CarrierTier>,
}

impl CarrierTypeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, carrier_id: impl Into<String>, tier: CarrierTier) {
        self.tiers.insert(carrier_id.into(), tier);
    }

    /// Tier for a carrier; carriers not in the table are `Unknown`.
    pub fn tier_of(&self, carrier_id: &str) -> CarrierTier {
        self.tiers.get(carrier_id).copied().unwrap_or_default()
    }

    /// Weight for a carrier: 1.5 for premium, 1.0 otherwise.
    pub fn weight_of(&self, carrier_id: &str) -> Decimal {
        self.tier_of(carrier_id).weight()
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, CarrierTier)> for CarrierTypeMap {
    fn from_iter<I: IntoIterator<Item = (S, CarrierTier)>>(iter: I) -> Self {
        Self {
            tiers: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

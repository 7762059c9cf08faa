//! Dimension: a single quota axis on an account.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DimensionType {
    RPM,
    TPM,
    RPD,
    TPD,
    BUDGET,
    SUBSCRIPTION,
    WINDOW,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DimensionSemantics {
    FixedWindow,
    TokenBucket,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DimensionSource {
    Headers,
    Polling,
    Estimated,
    Cached,
}

/// One slice of quota on an account (requests/min, tokens/min, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dimension {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub dimension_type: DimensionType,
    pub limit: f64,
    pub used: f64,
    pub remaining: f64,
    pub reset_at: Option<DateTime<Utc>>,
    pub refill_rate: Option<f64>,
    pub semantics: DimensionSemantics,
    pub source: DimensionSource,
    pub confidence: f64,
}

impl Dimension {
    pub fn new(dimension_type: DimensionType, limit: f64, used: f64, source: DimensionSource) -> Self {
        let remaining = (limit - used).max(0.0);
        Self {
            name: None,
            dimension_type,
            limit,
            used,
            remaining,
            reset_at: None,
            refill_rate: None,
            semantics: DimensionSemantics::Unknown,
            source,
            confidence: 1.0,
        }
    }

    /// `remaining / limit * 100`, or 0 when `limit` is 0 (an unbounded or
    /// unset dimension should never be read as "100% remaining").
    pub fn remaining_percent(&self) -> f64 {
        if self.limit > 0.0 {
            (self.remaining / self.limit) * 100.0
        } else {
            0.0
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining <= 0.0
    }

    /// `0 <= remaining <= limit` and `confidence` in `[0, 1]`.
    pub fn is_valid(&self) -> bool {
        self.remaining >= 0.0
            && self.remaining <= self.limit
            && (0.0..=1.0).contains(&self.confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_percent_zero_limit_is_zero_not_nan() {
        let dim = Dimension::new(DimensionType::RPM, 0.0, 0.0, DimensionSource::Estimated);
        assert_eq!(dim.remaining_percent(), 0.0);
    }

    #[test]
    fn remaining_percent_exact_boundary() {
        let dim = Dimension::new(DimensionType::RPM, 100.0, 50.0, DimensionSource::Headers);
        assert_eq!(dim.remaining_percent(), 50.0);
    }

    #[test]
    fn invalid_when_remaining_exceeds_limit() {
        let mut dim = Dimension::new(DimensionType::RPM, 100.0, 0.0, DimensionSource::Headers);
        dim.remaining = 150.0;
        assert!(!dim.is_valid());
    }

    #[test]
    fn invalid_confidence_out_of_range() {
        let mut dim = Dimension::new(DimensionType::RPM, 100.0, 0.0, DimensionSource::Headers);
        dim.confidence = 1.5;
        assert!(!dim.is_valid());
    }
}

//! QuotaInfo: a snapshot of an account's quota dimensions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::dimension::{Dimension, DimensionSource};
use super::provider::Provider;

/// A point-in-time view of one account's quota across all dimensions.
///
/// `effective_remaining_pct` and `critical_dimension` are derived fields:
/// they must be recomputed any time `dimensions` changes, which is why
/// construction goes through `QuotaInfo::new` / `set_dimensions` rather
/// than direct field assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaInfo {
    pub provider: Provider,
    pub account_id: String,
    pub tier: String,
    dimensions: Vec<Dimension>,
    effective_remaining_pct: f64,
    critical_dimension: Option<usize>,
    pub source: DimensionSource,
    pub confidence: f64,
    pub collected_at: DateTime<Utc>,
    pub is_throttled: bool,
    pub is_shadow_banned: bool,
    /// Reservation overhang: the sum of active reservations' estimated
    /// cost, subtracted from `effective_remaining_pct` when scoring.
    pub virtual_used_percent: f64,
}

impl QuotaInfo {
    pub fn new(
        provider: Provider,
        account_id: impl Into<String>,
        tier: impl Into<String>,
        dimensions: Vec<Dimension>,
        source: DimensionSource,
        confidence: f64,
    ) -> Self {
        let mut info = Self {
            provider,
            account_id: account_id.into(),
            tier: tier.into(),
            dimensions: Vec::new(),
            effective_remaining_pct: 0.0,
            critical_dimension: None,
            source,
            confidence,
            collected_at: Utc::now(),
            is_throttled: false,
            is_shadow_banned: false,
            virtual_used_percent: 0.0,
        };
        info.set_dimensions(dimensions);
        info
    }

    /// Replace the dimension list and recompute the derived fields. This
    /// is the only way `dimensions` should ever change post-construction.
    pub fn set_dimensions(&mut self, dimensions: Vec<Dimension>) {
        self.dimensions = dimensions;
        self.recompute();
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    fn recompute(&mut self) {
        if self.dimensions.is_empty() {
            self.effective_remaining_pct = 0.0;
            self.critical_dimension = None;
            return;
        }
        let mut min_idx = 0;
        let mut min_pct = f64::MAX;
        for (idx, dim) in self.dimensions.iter().enumerate() {
            let pct = dim.remaining_percent();
            if pct < min_pct {
                min_pct = pct;
                min_idx = idx;
            }
        }
        self.effective_remaining_pct = min_pct;
        self.critical_dimension = Some(min_idx);
    }

    pub fn effective_remaining_pct(&self) -> f64 {
        self.effective_remaining_pct
    }

    pub fn critical_dimension(&self) -> Option<&Dimension> {
        self.critical_dimension.map(|idx| &self.dimensions[idx])
    }

    /// `effective_remaining_pct` minus the outstanding reservation
    /// overhang — what the scorer actually treats as "remaining".
    pub fn effective_with_virtual(&self) -> f64 {
        self.effective_remaining_pct - self.virtual_used_percent
    }

    pub fn used_percent(&self) -> f64 {
        100.0 - self.effective_remaining_pct
    }

    pub fn find_dimension(
        &self,
        dimension_type: super::dimension::DimensionType,
    ) -> Option<&Dimension> {
        self.dimensions
            .iter()
            .find(|d| d.dimension_type == dimension_type)
    }

    pub fn any_dimension_exhausted(&self) -> bool {
        self.dimensions.iter().any(Dimension::is_exhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::dimension::{Dimension, DimensionType};

    #[test]
    fn effective_remaining_is_the_minimum_across_dimensions() {
        let dims = vec![
            Dimension::new(DimensionType::RPM, 100.0, 20.0, DimensionSource::Headers),
            Dimension::new(DimensionType::TPM, 1000.0, 900.0, DimensionSource::Headers),
        ];
        let quota = QuotaInfo::new(
            Provider::OpenAI,
            "acc-1",
            "default",
            dims,
            DimensionSource::Headers,
            1.0,
        );
        assert_eq!(quota.effective_remaining_pct(), 10.0);
        assert_eq!(
            quota.critical_dimension().unwrap().dimension_type,
            DimensionType::TPM
        );
    }

    #[test]
    fn recomputes_on_mutation() {
        let dims = vec![Dimension::new(
            DimensionType::RPM,
            100.0,
            10.0,
            DimensionSource::Headers,
        )];
        let mut quota = QuotaInfo::new(
            Provider::OpenAI,
            "acc-1",
            "default",
            dims,
            DimensionSource::Headers,
            1.0,
        );
        assert_eq!(quota.effective_remaining_pct(), 90.0);

        let new_dims = vec![Dimension::new(
            DimensionType::RPM,
            100.0,
            80.0,
            DimensionSource::Headers,
        )];
        quota.set_dimensions(new_dims);
        assert_eq!(quota.effective_remaining_pct(), 20.0);
    }

    #[test]
    fn effective_with_virtual_subtracts_reservation_overhang() {
        let dims = vec![Dimension::new(
            DimensionType::RPM,
            100.0,
            20.0,
            DimensionSource::Headers,
        )];
        let mut quota = QuotaInfo::new(
            Provider::OpenAI,
            "acc-1",
            "default",
            dims,
            DimensionSource::Headers,
            1.0,
        );
        quota.virtual_used_percent = 30.0;
        assert_eq!(quota.effective_with_virtual(), 50.0);
    }
}

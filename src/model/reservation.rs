//! Reservation: a soft hold against an account's quota.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Active,
    Released,
    Expired,
    Cancelled,
}

impl ReservationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReservationStatus::Released | ReservationStatus::Expired | ReservationStatus::Cancelled
        )
    }

    pub fn is_open(&self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Active)
    }
}

/// A soft hold on an account's quota, created ahead of an in-flight call
/// and resolved by `Release`, `Cancel`, or the expiry reaper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub id: String,
    pub account_id: String,
    pub estimated_cost_percent: f64,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
    pub correlation_id: String,
    pub actual_cost_percent: Option<f64>,
}

impl Reservation {
    pub fn new(
        id: impl Into<String>,
        account_id: impl Into<String>,
        estimated_cost_percent: f64,
        correlation_id: impl Into<String>,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            id: id.into(),
            account_id: account_id.into(),
            estimated_cost_percent,
            status: ReservationStatus::Active,
            created_at: now,
            expires_at: now + ttl,
            released_at: None,
            correlation_id: correlation_id.into(),
            actual_cost_percent: None,
        }
    }

    /// A reservation is active iff its status is `Active` and it has not
    /// yet passed its own `expires_at`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Active && now <= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_requires_status_and_unexpired_ttl() {
        let now = Utc::now();
        let mut res = Reservation::new("r1", "acc1", 5.0, "corr1", now, chrono::Duration::minutes(5));
        assert!(res.is_active(now));
        assert!(!res.is_active(now + chrono::Duration::minutes(10)));

        res.status = ReservationStatus::Released;
        assert!(!res.is_active(now));
    }

    #[test]
    fn terminal_states_are_released_expired_cancelled() {
        assert!(ReservationStatus::Released.is_terminal());
        assert!(ReservationStatus::Expired.is_terminal());
        assert!(ReservationStatus::Cancelled.is_terminal());
        assert!(!ReservationStatus::Active.is_terminal());
        assert!(!ReservationStatus::Pending.is_terminal());
    }
}

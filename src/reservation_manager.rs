//! Reservation manager: soft holds against an account's quota, plus the
//! background reaper that expires stale ones. The reaper's
//! tick-and-select loop is grounded on `main.rs`'s `tokio::select!`
//! server-runner idiom, generalized here into a ticker against a
//! `CancellationToken`-free stop signal.

use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use tokio::sync::{oneshot, Mutex};

use crate::clock::SharedClock;
use crate::error::ReservationError;
use crate::model::reservation::ReservationStatus;
use crate::model::Reservation;
use crate::store::Store;

pub struct ReservationManagerConfig {
    pub default_ttl: ChronoDuration,
    pub min_safe_threshold_pct: f64,
    pub reap_interval: std::time::Duration,
}

impl Default for ReservationManagerConfig {
    fn default() -> Self {
        Self {
            default_ttl: ChronoDuration::minutes(2),
            min_safe_threshold_pct: 5.0,
            reap_interval: std::time::Duration::from_secs(10),
        }
    }
}

pub struct ReservationManager {
    store: Arc<dyn Store>,
    clock: SharedClock,
    config: ReservationManagerConfig,
    /// Serializes create/release/cancel/expire per account so the
    /// `virtual_used_percent` algebraic-sum invariant never races.
    account_locks: Mutex<std::collections::HashMap<String, Arc<Mutex<()>>>>,
}

impl ReservationManager {
    pub fn new(store: Arc<dyn Store>, clock: SharedClock, config: ReservationManagerConfig) -> Self {
        Self {
            store,
            clock,
            config,
            account_locks: Mutex::new(std::collections::HashMap::new()),
        }
    }

    async fn lock_for(&self, account_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.account_locks.lock().await;
        locks
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn create(
        &self,
        account_id: &str,
        estimated_cost_percent: f64,
        correlation_id: &str,
    ) -> Result<Reservation, ReservationError> {
        let account_lock = self.lock_for(account_id).await;
        let _guard = account_lock.lock().await;

        let mut quota = self
            .store
            .get_quota(account_id)
            .await
            .map_err(|_| ReservationError::UnknownAccount(account_id.to_string()))?
            .ok_or_else(|| ReservationError::UnknownAccount(account_id.to_string()))?;

        let available = quota.effective_with_virtual();
        if available - estimated_cost_percent < self.config.min_safe_threshold_pct {
            return Err(ReservationError::InsufficientQuota {
                requested: estimated_cost_percent,
                available,
            });
        }

        let now = self.clock.now();
        let id = uuid::Uuid::new_v4().to_string();
        let reservation = Reservation::new(
            id,
            account_id,
            estimated_cost_percent,
            correlation_id,
            now,
            self.config.default_ttl,
        );

        quota.virtual_used_percent += estimated_cost_percent;
        self.store
            .set_quota(quota)
            .await
            .map_err(|_| ReservationError::UnknownAccount(account_id.to_string()))?;
        self.store
            .set_reservation(reservation.clone())
            .await
            .map_err(|_| ReservationError::UnknownAccount(account_id.to_string()))?;

        Ok(reservation)
    }

    async fn terminate(
        &self,
        id: &str,
        new_status: ReservationStatus,
        virtual_delta: impl Fn(&Reservation) -> f64,
        actual_cost_percent: Option<f64>,
        attempted: &'static str,
    ) -> Result<Reservation, ReservationError> {
        let mut reservation = self
            .store
            .get_reservation(id)
            .await
            .map_err(|_| ReservationError::NotFound(id.to_string()))?
            .ok_or_else(|| ReservationError::NotFound(id.to_string()))?;

        if !matches!(reservation.status, ReservationStatus::Active | ReservationStatus::Pending) {
            return Err(ReservationError::InvalidTransition {
                id: id.to_string(),
                from: reservation.status,
                attempted,
            });
        }

        let account_lock = self.lock_for(&reservation.account_id).await;
        let _guard = account_lock.lock().await;

        let delta = virtual_delta(&reservation);
        if let Some(mut quota) = self
            .store
            .get_quota(&reservation.account_id)
            .await
            .map_err(|_| ReservationError::UnknownAccount(reservation.account_id.clone()))?
        {
            quota.virtual_used_percent = (quota.virtual_used_percent + delta).max(0.0);
            self.store
                .set_quota(quota)
                .await
                .map_err(|_| ReservationError::UnknownAccount(reservation.account_id.clone()))?;
        }

        reservation.status = new_status;
        reservation.released_at = Some(self.clock.now());
        reservation.actual_cost_percent = actual_cost_percent;

        self.store
            .set_reservation(reservation.clone())
            .await
            .map_err(|_| ReservationError::NotFound(id.to_string()))?;

        Ok(reservation)
    }

    /// Net virtual-usage change is `-estimated + actual`, clamped so the
    /// running sum never goes negative from floating-point slop.
    pub async fn release(&self, id: &str, actual_cost_percent: f64) -> Result<Reservation, ReservationError> {
        self.terminate(
            id,
            ReservationStatus::Released,
            move |r| actual_cost_percent - r.estimated_cost_percent,
            Some(actual_cost_percent),
            "release",
        )
        .await
    }

    pub async fn cancel(&self, id: &str) -> Result<Reservation, ReservationError> {
        self.terminate(
            id,
            ReservationStatus::Cancelled,
            |r| -r.estimated_cost_percent,
            None,
            "cancel",
        )
        .await
    }

    async fn expire_one(&self, id: &str) -> Result<Reservation, ReservationError> {
        self.terminate(
            id,
            ReservationStatus::Expired,
            |r| -r.estimated_cost_percent,
            None,
            "expire",
        )
        .await
    }

    /// Run the reaper until `stop` fires. Runs as a background task
    /// spawned once at startup; errors are logged, never fatal.
    pub async fn run_reaper(self: Arc<Self>, mut stop: oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.reap_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.reap_once().await;
                }
                _ = &mut stop => {
                    tracing::info!("reservation reaper stopping");
                    break;
                }
            }
        }
    }

    async fn reap_once(&self) {
        let now = self.clock.now();
        let open = match self.store.list_open_reservations().await {
            Ok(open) => open,
            Err(err) => {
                tracing::warn!(error = %err, "failed to list open reservations for reaping");
                return;
            }
        };
        for reservation in open {
            if reservation.expires_at < now {
                if let Err(err) = self.expire_one(&reservation.id).await {
                    tracing::warn!(id = %reservation.id, error = %err, "failed to expire reservation");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FrozenClock;
    use crate::model::dimension::{Dimension, DimensionType};
    use crate::model::{Account, DimensionSource, Provider, QuotaInfo};
    use crate::store::InMemoryStore;

    async fn setup(remaining_pct: f64) -> (ReservationManager, Arc<InMemoryStore>, Arc<FrozenClock>) {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(FrozenClock::new(chrono::Utc::now()));

        let account = Account::new("acc-1", Provider::OpenAI, "cred");
        store.set_account(account).await.unwrap();

        let used = 100.0 - remaining_pct;
        let dims = vec![Dimension::new(DimensionType::RPM, 100.0, used, DimensionSource::Headers)];
        let quota = QuotaInfo::new(Provider::OpenAI, "acc-1", "default", dims, DimensionSource::Headers, 1.0);
        store.set_quota(quota).await.unwrap();

        let manager = ReservationManager::new(
            store.clone(),
            clock.clone() as SharedClock,
            ReservationManagerConfig::default(),
        );
        (manager, store, clock)
    }

    #[tokio::test]
    async fn create_then_release_nets_actual_cost() {
        let (manager, store, _clock) = setup(50.0).await;
        let reservation = manager.create("acc-1", 20.0, "corr-1").await.unwrap();

        let quota = store.get_quota("acc-1").await.unwrap().unwrap();
        assert_eq!(quota.virtual_used_percent, 20.0);

        let released = manager.release(&reservation.id, 15.0).await.unwrap();
        assert_eq!(released.status, ReservationStatus::Released);

        let quota_after = store.get_quota("acc-1").await.unwrap().unwrap();
        assert_eq!(quota_after.virtual_used_percent, 15.0);
    }

    #[tokio::test]
    async fn create_then_cancel_nets_zero_change() {
        let (manager, store, _clock) = setup(50.0).await;
        let reservation = manager.create("acc-1", 20.0, "corr-1").await.unwrap();
        manager.cancel(&reservation.id).await.unwrap();

        let quota = store.get_quota("acc-1").await.unwrap().unwrap();
        assert_eq!(quota.virtual_used_percent, 0.0);
    }

    #[tokio::test]
    async fn second_reservation_exceeding_safe_margin_fails() {
        let (manager, _store, _clock) = setup(50.0).await;
        // First reservation leaves 50.0 - 40.0 = 10.0 >= min_safe_pct(5.0), so it succeeds.
        manager.create("acc-1", 40.0, "corr-1").await.unwrap();
        // Second would leave 10.0 - 6.0 = 4.0 < min_safe_pct(5.0), so it's rejected.
        let err = manager.create("acc-1", 6.0, "corr-2").await.unwrap_err();
        assert!(matches!(err, ReservationError::InsufficientQuota { .. }));
    }

    #[tokio::test]
    async fn expire_runs_for_past_due_reservations() {
        let (manager, store, clock) = setup(50.0).await;
        let reservation = manager.create("acc-1", 10.0, "corr-1").await.unwrap();
        clock.advance(ChronoDuration::minutes(5));

        manager.reap_once().await;

        let updated = store.get_reservation(&reservation.id).await.unwrap().unwrap();
        assert_eq!(updated.status, ReservationStatus::Expired);
        let quota = store.get_quota("acc-1").await.unwrap().unwrap();
        assert_eq!(quota.virtual_used_percent, 0.0);
    }
}

//! Per-provider circuit breaker, grounded on `cratos-core`'s
//! `utils/circuit_breaker.rs`: atomic counters, three states, and a
//! compare-and-swap-guarded open -> half-open transition. Generalized
//! here to route the open/half-open boundary through the injected
//! [`Clock`] instead of wall-clock `SystemTime`, so tests can drive the
//! timeout deterministically.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::clock::SharedClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

fn decode(raw: u8) -> CircuitState {
    match raw {
        STATE_OPEN => CircuitState::Open,
        STATE_HALF_OPEN => CircuitState::HalfOpen,
        _ => CircuitState::Closed,
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in *closed* before tripping to *open*.
    pub failure_threshold: u32,
    /// Probes allowed in *half-open*; also the consecutive-success count
    /// needed to return to *closed*.
    pub half_open_limit: u32,
    /// How long *open* lasts before the next call may probe *half-open*.
    pub timeout: ChronoDuration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            half_open_limit: 3,
            timeout: ChronoDuration::seconds(30),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitMetrics {
    pub state: CircuitState,
    pub failures: u32,
    pub successes: u32,
    pub transitions: u32,
    pub rejected_calls: u32,
}

/// Outcome of [`CircuitBreaker::execute`]. Distinguishes a rejection the
/// breaker made itself from whatever `fn` returned.
#[derive(Debug)]
pub enum ExecuteError<E> {
    Open,
    Cancelled,
    Inner(E),
}

pub struct CircuitBreaker {
    provider: String,
    config: CircuitBreakerConfig,
    clock: SharedClock,
    state: AtomicU8,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    half_open_probes_issued: AtomicU32,
    last_state_change_millis: AtomicI64,
    total_transitions: AtomicU32,
    rejected_calls: AtomicU32,
}

impl CircuitBreaker {
    pub fn new(provider: impl Into<String>, config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        let now = clock.now().timestamp_millis();
        Self {
            provider: provider.into(),
            config,
            clock,
            state: AtomicU8::new(STATE_CLOSED),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            half_open_probes_issued: AtomicU32::new(0),
            last_state_change_millis: AtomicI64::new(now),
            total_transitions: AtomicU32::new(0),
            rejected_calls: AtomicU32::new(0),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn state(&self) -> CircuitState {
        decode(self.state.load(Ordering::SeqCst))
    }

    pub fn metrics(&self) -> CircuitMetrics {
        CircuitMetrics {
            state: self.state(),
            failures: self.failure_count.load(Ordering::SeqCst),
            successes: self.success_count.load(Ordering::SeqCst),
            transitions: self.total_transitions.load(Ordering::SeqCst),
            rejected_calls: self.rejected_calls.load(Ordering::SeqCst),
        }
    }

    /// Reject every call until `timeout` elapses since the breaker opened,
    /// at which point exactly one caller wins the CAS to *half-open*.
    fn promote_if_timed_out(&self) {
        if self.state.load(Ordering::SeqCst) != STATE_OPEN {
            return;
        }
        let opened_at = self.last_state_change_millis.load(Ordering::SeqCst);
        let now = self.clock.now().timestamp_millis();
        let elapsed = now - opened_at;
        if elapsed < self.config.timeout.num_milliseconds() {
            return;
        }
        if self
            .state
            .compare_exchange(STATE_OPEN, STATE_HALF_OPEN, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!(provider = %self.provider, "circuit breaker entering half-open");
            self.success_count.store(0, Ordering::SeqCst);
            self.failure_count.store(0, Ordering::SeqCst);
            self.half_open_probes_issued.store(0, Ordering::SeqCst);
            self.last_state_change_millis.store(now, Ordering::SeqCst);
            self.total_transitions.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn open(&self) {
        if self
            .state
            .compare_exchange(STATE_CLOSED, STATE_OPEN, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Already open or racing another opener from half-open; try that path too.
            let _ = self.state.compare_exchange(
                STATE_HALF_OPEN,
                STATE_OPEN,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
        }
        let now = self.clock.now().timestamp_millis();
        self.last_state_change_millis.store(now, Ordering::SeqCst);
        self.total_transitions.fetch_add(1, Ordering::SeqCst);
        warn!(provider = %self.provider, failures = self.failure_count.load(Ordering::SeqCst), "circuit breaker opened");
    }

    fn close(&self) {
        self.state.store(STATE_CLOSED, Ordering::SeqCst);
        self.failure_count.store(0, Ordering::SeqCst);
        self.success_count.store(0, Ordering::SeqCst);
        self.half_open_probes_issued.store(0, Ordering::SeqCst);
        let now = self.clock.now().timestamp_millis();
        self.last_state_change_millis.store(now, Ordering::SeqCst);
        self.total_transitions.fetch_add(1, Ordering::SeqCst);
        info!(provider = %self.provider, "circuit breaker closed");
    }

    pub fn reset(&self) {
        self.close();
    }

    /// Whether a call would be let through right now, without mutating state.
    pub fn can_execute(&self) -> bool {
        self.promote_if_timed_out();
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                self.half_open_probes_issued.load(Ordering::SeqCst) < self.config.half_open_limit
            }
        }
    }

    pub fn record_success(&self) {
        match self.state() {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
            }
            CircuitState::HalfOpen => {
                let successes = self.success_count.fetch_add(1, Ordering::SeqCst) + 1;
                debug!(provider = %self.provider, successes, "circuit breaker success in half-open");
                if successes >= self.config.half_open_limit {
                    self.close();
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        match self.state() {
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                debug!(provider = %self.provider, failures, threshold = self.config.failure_threshold, "circuit breaker failure recorded");
                if failures >= self.config.failure_threshold {
                    self.open();
                }
            }
            CircuitState::HalfOpen => {
                warn!(provider = %self.provider, "circuit breaker failure in half-open, reopening");
                self.open();
            }
            CircuitState::Open => {}
        }
    }

    /// Run `fn_` if the breaker allows it. Honors `cancelled` before
    /// invoking `fn_` — a call cancelled before it starts never counts
    /// as a success or a failure.
    pub async fn execute<F, Fut, T, E>(
        &self,
        cancelled: bool,
        fn_: F,
    ) -> Result<T, ExecuteError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if cancelled {
            return Err(ExecuteError::Cancelled);
        }
        if !self.can_execute() {
            self.rejected_calls.fetch_add(1, Ordering::SeqCst);
            return Err(ExecuteError::Open);
        }
        if self.state() == CircuitState::HalfOpen {
            self.half_open_probes_issued.fetch_add(1, Ordering::SeqCst);
        }
        match fn_().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(ExecuteError::Inner(err))
            }
        }
    }
}

/// Per-provider circuit breakers. A plain `RwLock<HashMap<..>>` is
/// plenty at the scale of a handful of providers; no need for a
/// sharded map.
#[derive(Clone)]
pub struct CircuitRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<CircuitBreaker>>>>,
}

impl CircuitRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn get_or_insert(
        &self,
        provider: &str,
        make: impl FnOnce() -> Arc<CircuitBreaker>,
    ) -> Arc<CircuitBreaker> {
        if let Some(cb) = self.inner.read().await.get(provider) {
            return cb.clone();
        }
        let mut guard = self.inner.write().await;
        guard.entry(provider.to_string()).or_insert_with(make).clone()
    }

    pub async fn all(&self) -> Vec<Arc<CircuitBreaker>> {
        self.inner.read().await.values().cloned().collect()
    }

    /// Whether the named provider's circuit is open. A provider with no
    /// breaker registered yet has never failed, so it reads as closed.
    pub async fn is_open(&self, provider: &str) -> bool {
        match self.inner.read().await.get(provider) {
            Some(cb) => cb.state() == CircuitState::Open,
            None => false,
        }
    }
}

impl Default for CircuitRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FrozenClock;

    fn breaker(failure_threshold: u32, half_open_limit: u32, timeout_secs: i64) -> CircuitBreaker {
        let clock: SharedClock = Arc::new(FrozenClock::new(chrono::Utc::now()));
        CircuitBreaker::new(
            "openai",
            CircuitBreakerConfig {
                failure_threshold,
                half_open_limit,
                timeout: ChronoDuration::seconds(timeout_secs),
            },
            clock,
        )
    }

    #[tokio::test]
    async fn opens_after_threshold_consecutive_failures() {
        let cb = breaker(3, 3, 30);
        for _ in 0..2 {
            let _ = cb
                .execute::<_, _, (), &str>(false, || async { Err("boom") })
                .await;
        }
        assert_eq!(cb.state(), CircuitState::Closed);

        let _ = cb
            .execute::<_, _, (), &str>(false, || async { Err("boom") })
            .await;
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn rejects_while_open_and_before_timeout() {
        let cb = breaker(1, 3, 30);
        let _ = cb
            .execute::<_, _, (), &str>(false, || async { Err("boom") })
            .await;
        assert_eq!(cb.state(), CircuitState::Open);

        let result = cb.execute::<_, _, (), &str>(false, || async { Ok(()) }).await;
        assert!(matches!(result, Err(ExecuteError::Open)));
        assert_eq!(cb.metrics().rejected_calls, 1);
    }

    #[tokio::test]
    async fn half_open_probe_succeeds_limit_times_then_closes() {
        let clock = Arc::new(FrozenClock::new(chrono::Utc::now()));
        let cb = CircuitBreaker::new(
            "openai",
            CircuitBreakerConfig {
                failure_threshold: 1,
                half_open_limit: 2,
                timeout: ChronoDuration::milliseconds(50),
            },
            clock.clone() as SharedClock,
        );
        let _ = cb
            .execute::<_, _, (), &str>(false, || async { Err("boom") })
            .await;
        assert_eq!(cb.state(), CircuitState::Open);

        clock.advance(ChronoDuration::milliseconds(60));

        let r1 = cb.execute::<_, _, (), &str>(false, || async { Ok(()) }).await;
        assert!(r1.is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let r2 = cb.execute::<_, _, (), &str>(false, || async { Ok(()) }).await;
        assert!(r2.is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens_circuit() {
        let clock = Arc::new(FrozenClock::new(chrono::Utc::now()));
        let cb = CircuitBreaker::new(
            "openai",
            CircuitBreakerConfig {
                failure_threshold: 1,
                half_open_limit: 3,
                timeout: ChronoDuration::milliseconds(10),
            },
            clock.clone() as SharedClock,
        );
        let _ = cb
            .execute::<_, _, (), &str>(false, || async { Err("boom") })
            .await;
        clock.advance(ChronoDuration::milliseconds(20));

        let _ = cb
            .execute::<_, _, (), &str>(false, || async { Err("boom") })
            .await;
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn cancelled_call_never_counts_as_failure() {
        let cb = breaker(1, 3, 30);
        let result = cb.execute::<_, _, (), &str>(true, || async { Ok(()) }).await;
        assert!(matches!(result, Err(ExecuteError::Cancelled)));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().failures, 0);
    }

    #[tokio::test]
    async fn reset_forces_closed() {
        let cb = breaker(1, 3, 30);
        let _ = cb
            .execute::<_, _, (), &str>(false, || async { Err("boom") })
            .await;
        assert_eq!(cb.state(), CircuitState::Open);
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());
    }

    #[tokio::test]
    async fn registry_reports_closed_for_unknown_provider() {
        let registry = CircuitRegistry::new();
        assert!(!registry.is_open("openai").await);
    }

    #[tokio::test]
    async fn registry_reports_open_once_breaker_trips() {
        let registry = CircuitRegistry::new();
        let clock: SharedClock = Arc::new(FrozenClock::new(chrono::Utc::now()));
        let cb = registry
            .get_or_insert("openai", || {
                Arc::new(CircuitBreaker::new(
                    "openai",
                    CircuitBreakerConfig {
                        failure_threshold: 1,
                        half_open_limit: 3,
                        timeout: ChronoDuration::seconds(30),
                    },
                    clock,
                ))
            })
            .await;
        cb.record_failure();
        assert!(registry.is_open("openai").await);
    }
}

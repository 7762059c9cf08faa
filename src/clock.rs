//! Injectable time source
//!
//! The circuit breaker, reservation reaper, passive collector, and health
//! checker all reason about elapsed wall-clock time. Routing through a
//! trait instead of calling `Utc::now()` directly lets tests advance time
//! deterministically instead of sleeping.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// A source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Real wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only advances when told to. Used in tests that exercise
/// circuit-breaker timeouts, reservation expiry, and collector flush
/// intervals without sleeping.
#[derive(Debug, Clone)]
pub struct FrozenClock {
    millis: Arc<AtomicI64>,
}

impl FrozenClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(start.timestamp_millis())),
        }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        self.millis.fetch_add(delta.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for FrozenClock {
    fn now(&self) -> DateTime<Utc> {
        let millis = self.millis.load(Ordering::SeqCst);
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }
}

pub type SharedClock = Arc<dyn Clock>;

pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frozen_clock_advances_on_command() {
        let start = Utc::now();
        let clock = FrozenClock::new(start);
        assert_eq!(clock.now().timestamp_millis(), start.timestamp_millis());
        clock.advance(chrono::Duration::seconds(30));
        assert_eq!(
            clock.now().timestamp_millis(),
            start.timestamp_millis() + 30_000
        );
    }
}

//! Shared application state, grounded on the teacher's `AppState`
//! (one `Arc` per long-lived service, a pool handle, a start time).

use std::sync::Arc;
use std::time::Instant;

use crate::circuit::CircuitRegistry;
use crate::collector::PassiveCollector;
use crate::config::Config;
use crate::fail_open::FailOpenClient;
use crate::health::HealthChecker;
use crate::reservation_manager::ReservationManager;
use crate::router::Router as QuotaRouter;
use crate::store::Store;

pub struct AppState {
    pub router: Arc<QuotaRouter>,
    pub reservations: Arc<ReservationManager>,
    pub collector: Arc<PassiveCollector>,
    pub health: Arc<HealthChecker>,
    pub fail_open: Arc<FailOpenClient>,
    pub store: Arc<dyn Store>,
    pub circuits: CircuitRegistry,
    pub config: Arc<Config>,
    pub start_time: Instant,
    pub version: String,
}

impl AppState {
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

//! Health checker: periodic provider liveness, a rolling latency
//! history per account, and a shadow-ban risk heuristic. Generalizes
//! the teacher's `ProviderHealth` (a single `healthy`/`avg_latency_ms`/
//! `error_rate` snapshot) into a fuller percentile history plus anomaly
//! detection, since the single-sample version can't support P95/P99 or
//! latency-spike detection.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::clock::SharedClock;

const HISTORY_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadowBanRisk {
    None,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Anomaly {
    LatencySpike,
    P95Anomaly,
    ErrorRateExceeded,
    Timeout,
}

#[derive(Debug, Clone)]
struct Sample {
    latency_ms: f64,
    is_error: bool,
    is_timeout: bool,
    at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub account_id: String,
    pub reachable: bool,
    pub avg_latency_ms: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub error_rate: f64,
    pub consecutive_errors: u32,
    pub anomalies: Vec<Anomaly>,
    pub shadow_ban_risk: ShadowBanRisk,
    pub last_checked: DateTime<Utc>,
}

struct AccountHealth {
    history: VecDeque<Sample>,
    consecutive_errors: u32,
}

impl AccountHealth {
    fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            consecutive_errors: 0,
        }
    }

    fn record(&mut self, sample: Sample) {
        if sample.is_error {
            self.consecutive_errors += 1;
        } else {
            self.consecutive_errors = 0;
        }
        if self.history.len() >= HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(sample);
    }

    fn percentile(&self, p: f64) -> f64 {
        if self.history.is_empty() {
            return 0.0;
        }
        let mut latencies: Vec<f64> = self.history.iter().map(|s| s.latency_ms).collect();
        latencies.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let idx = ((latencies.len() as f64 - 1.0) * p).round() as usize;
        latencies[idx.min(latencies.len() - 1)]
    }

    fn error_rate(&self) -> f64 {
        if self.history.is_empty() {
            return 0.0;
        }
        let errors = self.history.iter().filter(|s| s.is_error).count();
        errors as f64 / self.history.len() as f64
    }

    fn avg_latency(&self) -> f64 {
        if self.history.is_empty() {
            return 0.0;
        }
        self.history.iter().map(|s| s.latency_ms).sum::<f64>() / self.history.len() as f64
    }

    fn detect_anomalies(&self, sample: &Sample) -> Vec<Anomaly> {
        let mut found = Vec::new();
        if sample.is_timeout {
            found.push(Anomaly::Timeout);
        }
        let p95 = self.percentile(0.95);
        if p95 > 0.0 && sample.latency_ms > p95 * 2.0 {
            found.push(Anomaly::LatencySpike);
        }
        if self.history.len() >= 20 && p95 > 2000.0 {
            found.push(Anomaly::P95Anomaly);
        }
        if self.error_rate() > 0.2 {
            found.push(Anomaly::ErrorRateExceeded);
        }
        found
    }

    fn shadow_ban_risk(&self) -> ShadowBanRisk {
        let error_rate = self.error_rate();
        let latency_degraded = self.avg_latency() > 0.0 && self.percentile(0.95) > self.avg_latency() * 3.0;

        match (self.consecutive_errors, error_rate, latency_degraded) {
            (c, _, _) if c >= 10 => ShadowBanRisk::High,
            (_, rate, true) if rate > 0.3 => ShadowBanRisk::High,
            (c, rate, _) if c >= 5 || rate > 0.2 => ShadowBanRisk::Medium,
            (_, rate, true) => {
                let _ = rate;
                ShadowBanRisk::Low
            }
            (c, _, _) if c >= 2 => ShadowBanRisk::Low,
            _ => ShadowBanRisk::None,
        }
    }
}

pub struct HealthChecker {
    clock: SharedClock,
    accounts: RwLock<HashMap<String, AccountHealth>>,
}

impl HealthChecker {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            accounts: RwLock::new(HashMap::new()),
        }
    }

    /// 2xx and 401 both count as reachable — a 401 means the endpoint
    /// answered, just not for us.
    pub async fn record_probe(&self, account_id: &str, latency_ms: f64, status: Option<u16>, timed_out: bool) {
        let reachable = matches!(status, Some(200..=299) | Some(401));
        let sample = Sample {
            latency_ms,
            is_error: !reachable && !timed_out,
            is_timeout: timed_out,
            at: self.clock.now(),
        };

        let mut accounts = self.accounts.write().await;
        let entry = accounts.entry(account_id.to_string()).or_insert_with(AccountHealth::new);
        entry.record(sample);
    }

    pub async fn status(&self, account_id: &str) -> Option<HealthStatus> {
        let accounts = self.accounts.read().await;
        let health = accounts.get(account_id)?;
        let last_sample = health.history.back()?;
        Some(HealthStatus {
            account_id: account_id.to_string(),
            reachable: !last_sample.is_error && !last_sample.is_timeout,
            avg_latency_ms: health.avg_latency(),
            p50_latency_ms: health.percentile(0.50),
            p95_latency_ms: health.percentile(0.95),
            p99_latency_ms: health.percentile(0.99),
            error_rate: health.error_rate(),
            consecutive_errors: health.consecutive_errors,
            anomalies: health.detect_anomalies(last_sample),
            shadow_ban_risk: health.shadow_ban_risk(),
            last_checked: last_sample.at,
        })
    }

    pub async fn is_shadow_banned(&self, account_id: &str) -> bool {
        matches!(
            self.status(account_id).await.map(|s| s.shadow_ban_risk),
            Some(ShadowBanRisk::High) | Some(ShadowBanRisk::Medium)
        )
    }
}

pub type SharedHealthChecker = Arc<HealthChecker>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    fn checker() -> HealthChecker {
        HealthChecker::new(Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn no_samples_yields_no_status() {
        let checker = checker();
        assert!(checker.status("acc-1").await.is_none());
    }

    #[tokio::test]
    async fn consecutive_errors_drive_risk_up() {
        let checker = checker();
        for _ in 0..10 {
            checker.record_probe("acc-1", 100.0, Some(500), false).await;
        }
        let status = checker.status("acc-1").await.unwrap();
        assert_eq!(status.consecutive_errors, 10);
        assert_eq!(status.shadow_ban_risk, ShadowBanRisk::High);
        assert!(checker.is_shadow_banned("acc-1").await);
    }

    #[tokio::test]
    async fn success_resets_consecutive_errors() {
        let checker = checker();
        for _ in 0..3 {
            checker.record_probe("acc-1", 100.0, Some(500), false).await;
        }
        checker.record_probe("acc-1", 100.0, Some(200), false).await;
        let status = checker.status("acc-1").await.unwrap();
        assert_eq!(status.consecutive_errors, 0);
    }

    #[tokio::test]
    async fn unauthorized_counts_as_reachable() {
        let checker = checker();
        checker.record_probe("acc-1", 50.0, Some(401), false).await;
        let status = checker.status("acc-1").await.unwrap();
        assert!(status.reachable);
        assert_eq!(status.error_rate, 0.0);
    }

    #[tokio::test]
    async fn timeout_is_flagged_as_anomaly() {
        let checker = checker();
        checker.record_probe("acc-1", 5000.0, None, true).await;
        let status = checker.status("acc-1").await.unwrap();
        assert!(status.anomalies.contains(&Anomaly::Timeout));
    }
}

//! Configuration loading, grounded on `backend/config.rs`'s
//! `config` + `dotenvy` builder with `set_default` calls and a
//! prefixed environment override layer (`QUOTAGUARD__SECTION__KEY`).

use std::env;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub thresholds: ThresholdsConfig,
    pub circuit_breaker: CircuitBreakerSettings,
    pub collector: CollectorSettings,
    pub reservation: ReservationSettings,
    pub fail_open: FailOpenSettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `None` means run against the in-memory `Store`.
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub enabled: bool,
    pub bearer_tokens: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThresholdsConfig {
    pub warning_pct: f64,
    pub switch_pct: f64,
    pub critical_pct: f64,
    pub min_safe_pct: f64,
    pub hysteresis_margin_pct: f64,
    pub min_dwell_secs: i64,
    pub cooldown_after_switch_secs: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub half_open_limit: u32,
    pub timeout_secs: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectorSettings {
    pub capacity: usize,
    pub flush_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReservationSettings {
    pub default_ttl_secs: i64,
    pub reap_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FailOpenSettings {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        let raw = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.cors_origins", vec!["*"])?
            .set_default("server.shutdown_timeout_secs", 25)?
            .set_default("database.max_connections", 20)?
            .set_default("database.min_connections", 2)?
            .set_default("auth.enabled", false)?
            .set_default::<&str, Vec<String>>("auth.bearer_tokens", vec![])?
            .set_default("thresholds.warning_pct", 85.0)?
            .set_default("thresholds.switch_pct", 90.0)?
            .set_default("thresholds.critical_pct", 95.0)?
            .set_default("thresholds.min_safe_pct", 5.0)?
            .set_default("thresholds.hysteresis_margin_pct", 5.0)?
            .set_default("thresholds.min_dwell_secs", 300)?
            .set_default("thresholds.cooldown_after_switch_secs", 180)?
            .set_default("circuit_breaker.failure_threshold", 5)?
            .set_default("circuit_breaker.half_open_limit", 3)?
            .set_default("circuit_breaker.timeout_secs", 30)?
            .set_default("collector.capacity", 1000)?
            .set_default("collector.flush_interval_secs", 5)?
            .set_default("reservation.default_ttl_secs", 120)?
            .set_default("reservation.reap_interval_secs", 10)?
            .set_default("fail_open.timeout_ms", 50)?
            .set_default("fail_open.max_retries", 0)?
            .set_default("fail_open.retry_backoff_ms", 100)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("QUOTAGUARD").separator("__"))
            .build()?;

        Ok(Config {
            server: ServerConfig {
                host: raw.get("server.host")?,
                port: raw.get("server.port")?,
                cors_origins: raw.get("server.cors_origins")?,
                shutdown_timeout_secs: raw.get("server.shutdown_timeout_secs")?,
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").ok(),
                max_connections: raw.get("database.max_connections")?,
                min_connections: raw.get("database.min_connections")?,
            },
            auth: AuthConfig {
                enabled: raw.get("auth.enabled")?,
                bearer_tokens: env::var("QUOTAGUARD_BEARER_TOKENS")
                    .map(|v| v.split(',').map(str::to_string).collect())
                    .unwrap_or_else(|_| raw.get("auth.bearer_tokens").unwrap_or_default()),
            },
            thresholds: ThresholdsConfig {
                warning_pct: raw.get("thresholds.warning_pct")?,
                switch_pct: raw.get("thresholds.switch_pct")?,
                critical_pct: raw.get("thresholds.critical_pct")?,
                min_safe_pct: raw.get("thresholds.min_safe_pct")?,
                hysteresis_margin_pct: raw.get("thresholds.hysteresis_margin_pct")?,
                min_dwell_secs: raw.get("thresholds.min_dwell_secs")?,
                cooldown_after_switch_secs: raw.get("thresholds.cooldown_after_switch_secs")?,
            },
            circuit_breaker: CircuitBreakerSettings {
                failure_threshold: raw.get("circuit_breaker.failure_threshold")?,
                half_open_limit: raw.get("circuit_breaker.half_open_limit")?,
                timeout_secs: raw.get("circuit_breaker.timeout_secs")?,
            },
            collector: CollectorSettings {
                capacity: raw.get("collector.capacity")?,
                flush_interval_secs: raw.get("collector.flush_interval_secs")?,
            },
            reservation: ReservationSettings {
                default_ttl_secs: raw.get("reservation.default_ttl_secs")?,
                reap_interval_secs: raw.get("reservation.reap_interval_secs")?,
            },
            fail_open: FailOpenSettings {
                timeout_ms: raw.get("fail_open.timeout_ms")?,
                max_retries: raw.get("fail_open.max_retries")?,
                retry_backoff_ms: raw.get("fail_open.retry_backoff_ms")?,
            },
            logging: LoggingConfig {
                level: raw.get("logging.level")?,
                format: raw.get("logging.format")?,
            },
        })
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn thresholds(&self) -> crate::scorer::Thresholds {
        crate::scorer::Thresholds {
            warning_pct: self.thresholds.warning_pct,
            switch_pct: self.thresholds.switch_pct,
            critical_pct: self.thresholds.critical_pct,
            min_safe_pct: self.thresholds.min_safe_pct,
            hysteresis_margin_pct: self.thresholds.hysteresis_margin_pct,
            min_dwell: chrono::Duration::seconds(self.thresholds.min_dwell_secs),
            cooldown_after_switch: chrono::Duration::seconds(self.thresholds.cooldown_after_switch_secs),
        }
    }

    pub fn circuit_breaker_config(&self) -> crate::circuit::CircuitBreakerConfig {
        crate::circuit::CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker.failure_threshold,
            half_open_limit: self.circuit_breaker.half_open_limit,
            timeout: chrono::Duration::seconds(self.circuit_breaker.timeout_secs),
        }
    }

    pub fn collector_config(&self) -> crate::collector::CollectorConfig {
        crate::collector::CollectorConfig {
            capacity: self.collector.capacity,
            flush_interval: Duration::from_secs(self.collector.flush_interval_secs),
        }
    }

    pub fn reservation_config(&self) -> crate::reservation_manager::ReservationManagerConfig {
        crate::reservation_manager::ReservationManagerConfig {
            default_ttl: chrono::Duration::seconds(self.reservation.default_ttl_secs),
            min_safe_threshold_pct: self.thresholds.min_safe_pct,
            reap_interval: Duration::from_secs(self.reservation.reap_interval_secs),
        }
    }

    pub fn fail_open_config(&self) -> crate::fail_open::FailOpenConfig {
        crate::fail_open::FailOpenConfig {
            timeout: Duration::from_millis(self.fail_open.timeout_ms),
            strategy: crate::fail_open::FallbackStrategy::RoundRobin,
            max_retries: self.fail_open.max_retries,
            retry_backoff: Duration::from_millis(self.fail_open.retry_backoff_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_without_a_config_file_or_env() {
        let config = Config::load();
        assert!(config.is_ok());
        let config = config.unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.thresholds.critical_pct, 95.0);
    }
}

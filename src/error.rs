//! Error types for QuotaGuard

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Top-level error type for QuotaGuard operations.
#[derive(Debug, Error)]
pub enum QuotaGuardError {
    #[error("routing error: {0}")]
    Router(#[from] RouterError),

    #[error("reservation error: {0}")]
    Reservation(#[from] ReservationError),

    #[error("circuit breaker error: {0}")]
    Circuit(#[from] CircuitError),

    #[error("collector error: {0}")]
    Collector(#[from] CollectorError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("quota validation error: {0}")]
    QuotaValidation(String),

    #[error("rate limit exceeded, retry after {retry_after_secs:?}s")]
    RateLimitExceeded { retry_after_secs: Option<u64> },

    #[error("network error: {0}")]
    Network(String),

    #[error("timeout")]
    Timeout,

    #[error("cancelled")]
    Cancelled,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("internal error: {0}")]
    Internal(String),
}

/// Router-specific errors.
#[derive(Debug, Error, Clone)]
pub enum RouterError {
    #[error("no suitable accounts available: {reason}")]
    NoSuitableAccounts { reason: String },

    #[error("unknown account: {0}")]
    UnknownAccount(String),
}

/// Reservation-manager errors.
#[derive(Debug, Error, Clone)]
pub enum ReservationError {
    #[error("insufficient quota to reserve {requested:.2}% (available {available:.2}%)")]
    InsufficientQuota { requested: f64, available: f64 },

    #[error("invalid state transition: reservation {id} is {from:?}, cannot {attempted}")]
    InvalidTransition {
        id: String,
        from: crate::model::reservation::ReservationStatus,
        attempted: &'static str,
    },

    #[error("reservation not found: {0}")]
    NotFound(String),

    #[error("account not found: {0}")]
    UnknownAccount(String),
}

/// Circuit-breaker errors.
#[derive(Debug, Error, Clone)]
pub enum CircuitError {
    #[error("circuit open for provider {provider}")]
    Open { provider: String },
}

/// Passive-collector errors.
#[derive(Debug, Error, Clone)]
pub enum CollectorError {
    #[error("collector is not running")]
    NotRunning,

    #[error("collector is already running")]
    AlreadyRunning,

    #[error("buffer full (capacity {capacity})")]
    BufferFull { capacity: usize },
}

/// Store-backend errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, QuotaGuardError>;

/// API error response body.
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for QuotaGuardError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            QuotaGuardError::Router(RouterError::NoSuitableAccounts { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, "NO_SUITABLE_ACCOUNTS")
            }
            QuotaGuardError::Router(RouterError::UnknownAccount(_)) => {
                (StatusCode::NOT_FOUND, "UNKNOWN_ACCOUNT")
            }
            QuotaGuardError::Reservation(ReservationError::InsufficientQuota { .. }) => {
                (StatusCode::CONFLICT, "INSUFFICIENT_QUOTA")
            }
            QuotaGuardError::Reservation(ReservationError::InvalidTransition { .. }) => {
                (StatusCode::CONFLICT, "RESERVATION_INVALID_TRANSITION")
            }
            QuotaGuardError::Reservation(ReservationError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, "RESERVATION_NOT_FOUND")
            }
            QuotaGuardError::Reservation(ReservationError::UnknownAccount(_)) => {
                (StatusCode::NOT_FOUND, "UNKNOWN_ACCOUNT")
            }
            QuotaGuardError::Circuit(CircuitError::Open { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, "CIRCUIT_OPEN")
            }
            QuotaGuardError::Collector(CollectorError::BufferFull { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, "BUFFER_FULL")
            }
            QuotaGuardError::Collector(_) => (StatusCode::CONFLICT, "COLLECTOR_ERROR"),
            QuotaGuardError::Store(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR")
            }
            QuotaGuardError::QuotaValidation(_) => {
                (StatusCode::BAD_REQUEST, "QUOTA_VALIDATION_ERROR")
            }
            QuotaGuardError::RateLimitExceeded { .. } => {
                (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMIT_EXCEEDED")
            }
            QuotaGuardError::Network(_) => (StatusCode::BAD_GATEWAY, "NETWORK_ERROR"),
            QuotaGuardError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT"),
            QuotaGuardError::Cancelled => (StatusCode::BAD_REQUEST, "CANCELLED"),
            QuotaGuardError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            QuotaGuardError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            QuotaGuardError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
            QuotaGuardError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            QuotaGuardError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = Json(json!({
            "error": self.to_string(),
            "code": code,
        }));

        (status, body).into_response()
    }
}

/// Substring-detected network-class errors, shared by the circuit breaker's
/// failure classification and the fail-open client's fallback trigger.
const NETWORK_ERROR_SUBSTRINGS: &[&str] = &[
    "connection refused",
    "connection reset",
    "no such host",
    "timeout",
    "deadline exceeded",
    "network is unreachable",
    "connection timed out",
    "i/o timeout",
];

pub fn is_network_class_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    NETWORK_ERROR_SUBSTRINGS
        .iter()
        .any(|needle| lower.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_network_class_errors() {
        assert!(is_network_class_error("Connection Refused by peer"));
        assert!(is_network_class_error("request timeout after 5s"));
        assert!(is_network_class_error("i/o timeout"));
        assert!(!is_network_class_error("invalid api key"));
    }

    #[test]
    fn router_error_display() {
        let err = RouterError::NoSuitableAccounts {
            reason: "no enabled accounts available".to_string(),
        };
        assert!(err.to_string().contains("no enabled accounts available"));
    }
}

//! Route handlers, grounded on the teacher's `handlers.rs` (thin
//! extractors, delegate to the owning service, map the result straight
//! into a `Json` response via the error type's `IntoResponse`).

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::{QuotaGuardError, Result};
use crate::model::dimension::{Dimension, DimensionType};
use crate::model::{DimensionSource, Provider, QuotaInfo, Reservation};
use crate::scorer::SelectRequest;

use super::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SelectRequestBody {
    pub provider: Option<Provider>,
    #[serde(default)]
    pub required_dims: Vec<DimensionType>,
    #[serde(default)]
    pub estimated_cost: f64,
    #[serde(default)]
    pub estimated_tokens: f64,
    #[serde(default = "default_policy")]
    pub policy: String,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub exclude_providers: Vec<Provider>,
    pub model: Option<String>,
    #[serde(default)]
    pub ignore_estimated: bool,
}

fn default_policy() -> String {
    "balanced".to_string()
}

impl From<SelectRequestBody> for SelectRequest {
    fn from(body: SelectRequestBody) -> Self {
        Self {
            provider: body.provider,
            required_dims: body.required_dims,
            estimated_cost: body.estimated_cost,
            estimated_tokens: body.estimated_tokens,
            policy: body.policy,
            exclude: body.exclude,
            exclude_providers: body.exclude_providers,
            model: body.model,
            ignore_estimated: body.ignore_estimated,
        }
    }
}

/// POST /router/select
pub async fn select(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SelectRequestBody>,
) -> Result<Json<crate::router::SelectResponse>> {
    let response = state.router.select(body.into()).await?;
    state.router.record_switch(&response.account_id).await;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub account_id: String,
    pub reservation_id: Option<String>,
    pub actual_cost_percent: Option<f64>,
    pub success: bool,
    pub error: Option<String>,
    pub latency_ms: f64,
}

#[derive(Debug, Serialize, Default)]
pub struct FeedbackResponse {}

/// POST /router/feedback — absorbs provider-call outcomes into the
/// circuit breaker, the health checker's latency history, and (when a
/// reservation is named) releases it against the actual cost observed.
pub async fn feedback(
    State(state): State<Arc<AppState>>,
    Json(body): Json<FeedbackRequest>,
) -> Result<Json<FeedbackResponse>> {
    if let Some(account) = state.store.get_account(&body.account_id).await? {
        let provider = account.provider.as_str().to_string();
        let cb = state
            .circuits
            .get_or_insert(&provider, || {
                Arc::new(crate::circuit::CircuitBreaker::new(
                    provider.clone(),
                    state.config.circuit_breaker_config(),
                    crate::clock::system_clock(),
                ))
            })
            .await;
        if body.success {
            cb.record_success();
        } else {
            cb.record_failure();
        }
    }

    let status = if body.success { Some(200) } else { Some(500) };
    state
        .health
        .record_probe(&body.account_id, body.latency_ms, status, false)
        .await;

    let shadow_banned = state.health.is_shadow_banned(&body.account_id).await;
    if let Ok(Some(mut quota)) = state.store.get_quota(&body.account_id).await {
        if quota.is_shadow_banned != shadow_banned {
            quota.is_shadow_banned = shadow_banned;
            if let Err(err) = state.store.set_quota(quota).await {
                tracing::warn!(account_id = %body.account_id, error = %err, "failed to persist shadow-ban status");
            }
        }
    }

    if let (Some(reservation_id), Some(actual_cost_percent)) = (&body.reservation_id, body.actual_cost_percent) {
        if let Err(err) = state.reservations.release(reservation_id, actual_cost_percent).await {
            tracing::warn!(reservation_id, error = %err, "feedback could not release reservation");
        }
    }

    if !body.success {
        tracing::warn!(account_id = %body.account_id, error = body.error.as_deref().unwrap_or("unknown"), "provider call failed");
    }

    Ok(Json(FeedbackResponse::default()))
}

/// GET /router/distribution
pub async fn distribution(State(state): State<Arc<AppState>>) -> Json<HashMap<String, u32>> {
    Json(state.router.distribution().await)
}

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub provider: Provider,
    pub account_id: String,
    pub tier: String,
    pub dimensions: Vec<Dimension>,
    pub source: DimensionSource,
    pub confidence: f64,
}

#[derive(Debug, Serialize, Default)]
pub struct IngestResponse {}

/// POST /ingest — builds a `QuotaInfo` through its constructor so the
/// derived `effective_remaining_pct`/`critical_dimension` fields can
/// never disagree with the dimensions the caller sent.
pub async fn ingest(
    State(state): State<Arc<AppState>>,
    Json(body): Json<IngestRequest>,
) -> Result<Json<IngestResponse>> {
    let quota = QuotaInfo::new(
        body.provider,
        body.account_id,
        body.tier,
        body.dimensions,
        body.source,
        body.confidence,
    );
    state
        .collector
        .ingest(quota)
        .await
        .map_err(QuotaGuardError::Collector)?;
    Ok(Json(IngestResponse::default()))
}

/// GET /quotas
pub async fn list_quotas(State(state): State<Arc<AppState>>) -> Result<Json<Vec<QuotaInfo>>> {
    Ok(Json(state.store.list_quotas().await?))
}

/// GET /quotas/:id
pub async fn get_quota(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<String>,
) -> Result<Json<QuotaInfo>> {
    state
        .store
        .get_quota(&account_id)
        .await?
        .map(Json)
        .ok_or_else(|| QuotaGuardError::NotFound(format!("quota for account {account_id}")))
}

#[derive(Debug, Deserialize)]
pub struct CreateReservationRequest {
    pub account_id: String,
    pub estimated_cost_percent: f64,
    pub correlation_id: String,
}

/// POST /reservations
pub async fn create_reservation(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateReservationRequest>,
) -> Result<Json<Reservation>> {
    let reservation = state
        .reservations
        .create(&body.account_id, body.estimated_cost_percent, &body.correlation_id)
        .await?;
    Ok(Json(reservation))
}

#[derive(Debug, Deserialize)]
pub struct ReleaseReservationRequest {
    pub actual_cost_percent: f64,
}

/// POST /reservations/:id/release
pub async fn release_reservation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ReleaseReservationRequest>,
) -> Result<Json<Reservation>> {
    let reservation = state.reservations.release(&id, body.actual_cost_percent).await?;
    Ok(Json(reservation))
}

/// POST /reservations/:id/cancel
pub async fn cancel_reservation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Reservation>> {
    let reservation = state.reservations.cancel(&id).await?;
    Ok(Json(reservation))
}

/// GET /reservations/:id
pub async fn get_reservation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Reservation>> {
    state
        .store
        .get_reservation(&id)
        .await?
        .map(Json)
        .ok_or_else(|| QuotaGuardError::NotFound(format!("reservation {id}")))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub router: RouterHealth,
}

#[derive(Debug, Serialize)]
pub struct RouterHealth {
    pub uptime_seconds: u64,
    pub version: String,
    pub open_circuits: Vec<String>,
}

/// GET /health — public, no auth. Unhealthy only when a circuit breaker
/// for some provider is open; a healthy router can still be unable to
/// select an account for a given request, which is a routing concern,
/// not a liveness one.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let circuits = state.circuits.all().await;
    let open_circuits: Vec<String> = circuits
        .iter()
        .filter(|cb| cb.state() == crate::circuit::CircuitState::Open)
        .map(|cb| cb.provider().to_string())
        .collect();

    let status = if open_circuits.is_empty() { "healthy" } else { "unhealthy" };

    Json(HealthResponse {
        status,
        router: RouterHealth {
            uptime_seconds: state.uptime_seconds(),
            version: state.version.clone(),
            open_circuits,
        },
    })
}

pub async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "route not found", "code": "NOT_FOUND" })),
    )
}

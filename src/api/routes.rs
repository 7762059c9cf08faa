//! Route table, grounded on `backend/api/routes.rs`'s nested-`Router`
//! plus `TraceLayer`/`CorsLayer`/logging-middleware layering style.

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::{handlers, middleware::logging_middleware, state::AppState};

pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let authenticated = Router::new()
        .route("/router/select", post(handlers::select))
        .route("/router/feedback", post(handlers::feedback))
        .route("/router/distribution", get(handlers::distribution))
        .route("/ingest", post(handlers::ingest))
        .route("/quotas", get(handlers::list_quotas))
        .route("/quotas/:id", get(handlers::get_quota))
        .route("/reservations", post(handlers::create_reservation))
        .route("/reservations/:id/release", post(handlers::release_reservation))
        .route("/reservations/:id/cancel", post(handlers::cancel_reservation))
        .route("/reservations/:id", get(handlers::get_reservation))
        .layer(middleware::from_fn_with_state(state.clone(), super::middleware::auth_middleware));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(authenticated)
        .fallback(handlers::not_found)
        .layer(middleware::from_fn(logging_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}

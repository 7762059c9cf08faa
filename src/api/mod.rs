//! HTTP API surface.

mod handlers;
mod middleware;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;

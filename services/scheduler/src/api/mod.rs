//! HTTP routing for the extender.

pub mod error;
mod extender;
mod health;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the extender router with all routes and middleware.
///
/// `max_body_bytes` caps `/filter` and `/score` request bodies. The scheduler
/// sends whole Node objects when it is not node-cache capable, so the cap
/// has to be far above axum's 2 MiB default.
pub fn create_router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .merge(health::routes())
        .merge(extender::routes(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

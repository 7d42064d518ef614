//! Axum router construction for the query API.

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the complete Axum router.
///
/// The router includes:
/// - `GET /client/state` -- live events
/// - `GET /client/state/{id}` -- single live event
/// - `GET /client/removed` -- archived events
/// - `GET /health` -- status probe
/// - `GET /ws/changes` -- `WebSocket` change notification stream,
///   optionally `?event_id=`
///
/// CORS allows any origin.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/client/state", get(handlers::client_state))
        .route("/client/state/{id}", get(handlers::client_event))
        .route("/client/removed", get(handlers::client_removed))
        .route("/health", get(handlers::health))
        .route("/ws/changes", get(ws::ws_changes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

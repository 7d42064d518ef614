//! REST API endpoint handlers for the query server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/client/state` | Live events keyed by ID |
//! | `GET` | `/client/state/{id}` | One live event |
//! | `GET` | `/client/removed` | Archived events keyed by ID |
//! | `GET` | `/health` | Mapping version and table sizes |

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use scoreline_types::{EventId, SportEvent};
use serde::Serialize;

use crate::error::ObserverError;
use crate::state::AppState;

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `ok` once a mapping snapshot is loaded, `bootstrapping` before.
    pub status: &'static str,
    /// Current mapping snapshot version.
    pub mapping_version: u64,
    /// Events in the live table.
    pub live: usize,
    /// Archived events.
    pub removed: usize,
}

/// Every live event, transformed to names.
pub async fn client_state(State(state): State<Arc<AppState>>) -> Json<BTreeMap<EventId, SportEvent>> {
    Json(state.events.current_events())
}

/// One live event.
///
/// # Errors
///
/// Returns [`ObserverError::NotFound`] if the event is not live or no
/// longer transforms.
pub async fn client_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SportEvent>, ObserverError> {
    let id = EventId::new(id);
    state
        .events
        .current_event(&id)
        .map(Json)
        .ok_or_else(|| ObserverError::NotFound(format!("event {id}")))
}

/// Every archived event.
pub async fn client_removed(
    State(state): State<Arc<AppState>>,
) -> Json<BTreeMap<EventId, SportEvent>> {
    Json(state.events.removed_events())
}

/// Liveness and bootstrap status.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let mapping_version = state.events.mapping_version();
    Json(HealthResponse {
        status: if mapping_version > 0 { "ok" } else { "bootstrapping" },
        mapping_version,
        live: state.events.live_count(),
        removed: state.events.removed_count(),
    })
}

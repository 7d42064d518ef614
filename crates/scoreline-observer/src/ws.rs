//! Change stream for dashboard clients.
//!
//! `GET /ws/changes` pushes every [`ChangeNotification`] the reconciliation
//! engine emits after the connection is upgraded, one JSON text frame each.
//! `?event_id=<id>` narrows the stream to a single event. Notifications are
//! not replayed: a client reads `/client/state` first and applies changes on
//! top. A client too slow for the broadcast buffer loses the oldest changes
//! and should refetch the state.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use scoreline_types::{ChangeNotification, EventId};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::state::AppState;

/// Query parameters for `/ws/changes`.
#[derive(Debug, Default, Deserialize)]
pub struct ChangeFilter {
    /// Only forward changes for this event.
    pub event_id: Option<String>,
}

impl ChangeFilter {
    fn accepts(&self, notification: &ChangeNotification) -> bool {
        self.event_id
            .as_deref()
            .is_none_or(|id| notification.event_id() == &EventId::new(id))
    }
}

/// `GET /ws/changes`
pub async fn ws_changes(
    ws: WebSocketUpgrade,
    Query(filter): Query<ChangeFilter>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_changes(socket, state, filter))
}

async fn stream_changes(mut socket: WebSocket, state: Arc<AppState>, filter: ChangeFilter) {
    let mut rx = state.subscribe();
    debug!(event_id = ?filter.event_id, "Change stream opened");

    loop {
        tokio::select! {
            result = rx.recv() => match result {
                Ok(notification) if filter.accepts(&notification) => {
                    let frame = match serde_json::to_string(&notification) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(event_id = %notification.event_id(), "Unencodable change notification: {e}");
                            continue;
                        }
                    };
                    if socket.send(Message::Text(frame.into())).await.is_err() {
                        debug!("Change stream closed by client");
                        return;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Change stream subscriber fell behind, dropped oldest changes");
                }
                Err(RecvError::Closed) => {
                    debug!("Engine stopped publishing, closing change stream");
                    let _ = socket.send(Message::Close(None)).await;
                    return;
                }
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Ping(data))) => {
                    if socket.send(Message::Pong(data)).await.is_err() {
                        return;
                    }
                }
                Some(Ok(Message::Close(_)) | Err(_)) | None => {
                    debug!("Change stream closed by client");
                    return;
                }
                // The stream is one-way.
                Some(Ok(_)) => {}
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn removed(id: &str) -> ChangeNotification {
        ChangeNotification::Removed {
            event_id: EventId::new(id),
        }
    }

    #[test]
    fn unfiltered_stream_forwards_everything() {
        let filter = ChangeFilter::default();
        assert!(filter.accepts(&removed("a")));
        assert!(filter.accepts(&removed("b")));
    }

    #[test]
    fn event_filter_drops_other_events() {
        let filter = ChangeFilter {
            event_id: Some(String::from("a")),
        };
        assert!(filter.accepts(&removed("a")));
        assert!(!filter.accepts(&removed("b")));
    }
}

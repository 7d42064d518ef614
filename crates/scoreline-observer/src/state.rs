//! Shared application state for the query API server.

use std::sync::Arc;

use scoreline_core::EventQuery;
use scoreline_types::ChangeNotification;
use tokio::sync::broadcast;

/// Shared state for the Axum application.
///
/// Wrapped in [`Arc`] and injected via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    /// Read access to the reconciled events.
    pub events: Arc<dyn EventQuery>,
    /// Sender side of the engine's notification channel.
    pub tx: broadcast::Sender<ChangeNotification>,
}

impl AppState {
    /// Create state serving `events` and streaming from `tx`.
    pub const fn new(events: Arc<dyn EventQuery>, tx: broadcast::Sender<ChangeNotification>) -> Self {
        Self { events, tx }
    }

    /// Subscribe to change notifications.
    ///
    /// If a subscriber falls behind by more than the channel capacity it
    /// receives [`broadcast::error::RecvError::Lagged`] and skips ahead.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotification> {
        self.tx.subscribe()
    }
}

//! Enumeration types for the Scoreline feed.
//!
//! Covers the competitor side marker used in human-readable events and the
//! change notifications emitted by each reconciliation cycle.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::EventId;
use crate::structs::PeriodScore;

// ---------------------------------------------------------------------------
// Competitor side
// ---------------------------------------------------------------------------

/// Which side of the fixture a competitor plays on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "UPPERCASE")]
#[ts(export, export_to = "bindings/")]
pub enum CompetitorSide {
    /// The home competitor (fifth column of an event row).
    Home,
    /// The away competitor (sixth column of an event row).
    Away,
}

impl CompetitorSide {
    /// The wire label, `HOME` or `AWAY`.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Home => "HOME",
            Self::Away => "AWAY",
        }
    }
}

impl core::fmt::Display for CompetitorSide {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Change notifications
// ---------------------------------------------------------------------------

/// A change observed while reconciling one event feed cycle.
///
/// Names are already resolved through the mapping cache; the only raw
/// value carried is the event ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ChangeNotification {
    /// An event was seen for the first time.
    Created {
        /// The new event.
        event_id: EventId,
        /// Resolved sport name.
        sport: String,
        /// Resolved competition name.
        competition: String,
        /// Resolved status name.
        status: String,
    },
    /// An event's status changed.
    StatusChanged {
        /// The event whose status changed.
        event_id: EventId,
        /// Previous status name, absent if it no longer resolves.
        from: Option<String>,
        /// New status name.
        to: String,
    },
    /// One scoring period of an event changed.
    ScoreChanged {
        /// The event whose score changed.
        event_id: EventId,
        /// Resolved period name.
        period: String,
        /// Score before this cycle (`0:0` for a period seen for the first time).
        previous: PeriodScore,
        /// Score after this cycle.
        current: PeriodScore,
    },
    /// An event disappeared from the feed and was archived.
    Removed {
        /// The archived event.
        event_id: EventId,
    },
}

impl ChangeNotification {
    /// The event this notification refers to.
    pub const fn event_id(&self) -> &EventId {
        match self {
            Self::Created { event_id, .. }
            | Self::StatusChanged { event_id, .. }
            | Self::ScoreChanged { event_id, .. }
            | Self::Removed { event_id } => event_id,
        }
    }
}

//! Core entity structs for the Scoreline feed.
//!
//! [`RawEvent`] is the ID-encoded record as it arrives on the event feed
//! and as it is stored in the live table. [`SportEvent`] is its
//! human-readable projection, computed through the mapping cache.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::{Error as _, Unexpected};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ts_rs::TS;

use crate::enums::CompetitorSide;
use crate::ids::{EventId, MappingId};

/// Literal used by the feed (and by the readable view) for an event without
/// scores.
pub const SCORES_NOT_AVAILABLE: &str = "N/A";

/// Status name forced onto archived events.
pub const REMOVED_STATUS: &str = "REMOVED";

/// Status name of the pre-match placeholder used for unscored rows.
pub const PRE_MATCH_STATUS: &str = "PRE";

// ---------------------------------------------------------------------------
// Raw event
// ---------------------------------------------------------------------------

/// An event record as parsed from one event feed row.
///
/// Every field except `id` and `start_time` is an opaque mapping ID. Only
/// `status_id`, `scores` and `changed_at` change after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct RawEvent {
    /// Event identifier.
    pub id: EventId,
    /// Sport mapping ID.
    pub sport_id: MappingId,
    /// Competition mapping ID.
    pub competition_id: MappingId,
    /// Start time exactly as sent upstream (epoch milliseconds).
    pub start_time: String,
    /// Home competitor mapping ID.
    pub home_competitor_id: MappingId,
    /// Away competitor mapping ID.
    pub away_competitor_id: MappingId,
    /// Status mapping ID.
    pub status_id: MappingId,
    /// `N/A` or `periodId@home:away` entries joined by `|`.
    pub scores: String,
    /// When this record last changed (creation, status or score).
    pub changed_at: Option<DateTime<Utc>>,
}

impl RawEvent {
    /// Whether the record carries no scores.
    pub fn is_unscored(&self) -> bool {
        self.scores == SCORES_NOT_AVAILABLE
    }
}

// ---------------------------------------------------------------------------
// Human-readable event
// ---------------------------------------------------------------------------

/// Score of one period, with its resolved period name echoed as `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct PeriodScore {
    /// Resolved period name (for example `CURRENT` or `PERIOD_1`).
    #[serde(rename = "type")]
    pub period: String,
    /// Home score as sent upstream.
    pub home: String,
    /// Away score as sent upstream.
    pub away: String,
}

impl PeriodScore {
    /// A `0:0` score, the baseline for a period seen for the first time.
    pub fn nil(period: impl Into<String>) -> Self {
        Self {
            period: period.into(),
            home: String::from("0"),
            away: String::from("0"),
        }
    }

    /// Whether home or away differs from `other`.
    pub fn differs_from(&self, other: &Self) -> bool {
        self.home != other.home || self.away != other.away
    }
}

/// Scores of a readable event: either `"N/A"` or a map keyed by period name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Scores {
    /// The event has no scores yet.
    #[default]
    NotAvailable,
    /// Scores keyed by resolved period name.
    Periods(BTreeMap<String, PeriodScore>),
}

impl Scores {
    /// Look up one period's score.
    pub fn period(&self, name: &str) -> Option<&PeriodScore> {
        match self {
            Self::NotAvailable => None,
            Self::Periods(periods) => periods.get(name),
        }
    }
}

impl Serialize for Scores {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::NotAvailable => serializer.serialize_str(SCORES_NOT_AVAILABLE),
            Self::Periods(periods) => periods.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Scores {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Literal(String),
            Periods(BTreeMap<String, PeriodScore>),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Literal(literal) if literal == SCORES_NOT_AVAILABLE => Ok(Self::NotAvailable),
            Repr::Literal(other) => Err(D::Error::invalid_value(
                Unexpected::Str(&other),
                &"\"N/A\" or a map of period scores",
            )),
            Repr::Periods(periods) => Ok(Self::Periods(periods)),
        }
    }
}

/// A named competitor, with its side echoed as `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Competitor {
    /// Home or away.
    #[serde(rename = "type")]
    pub side: CompetitorSide,
    /// Resolved competitor name.
    pub name: String,
}

/// The fixed home/away pair of a readable event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Competitors {
    /// Home competitor.
    #[serde(rename = "HOME")]
    pub home: Competitor,
    /// Away competitor.
    #[serde(rename = "AWAY")]
    pub away: Competitor,
}

impl Competitors {
    /// Build the pair from two resolved names.
    pub fn new(home: impl Into<String>, away: impl Into<String>) -> Self {
        Self {
            home: Competitor {
                side: CompetitorSide::Home,
                name: home.into(),
            },
            away: Competitor {
                side: CompetitorSide::Away,
                name: away.into(),
            },
        }
    }
}

/// Human-readable projection of a [`RawEvent`].
///
/// Never mutated: live events are recomputed on every query, archived
/// events are frozen at removal time with status `REMOVED`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct SportEvent {
    /// Event identifier.
    pub id: EventId,
    /// Resolved status name.
    pub status: String,
    /// Resolved sport name.
    pub sport: String,
    /// Resolved competition name.
    pub competition: String,
    /// Start time exactly as sent upstream.
    pub start_time: String,
    /// Home and away competitors.
    pub competitors: Competitors,
    /// `"N/A"` or period scores keyed by period name.
    #[ts(type = "\"N/A\" | Record<string, PeriodScore>")]
    pub scores: Scores,
}

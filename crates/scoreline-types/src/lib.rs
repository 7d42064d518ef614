//! Shared type definitions for the Scoreline live sport event feed.
//!
//! This crate is the single source of truth for the records exchanged
//! between the reconciliation core and the query API. Types defined here
//! flow downstream to `TypeScript` via `ts-rs` for dashboard consumers.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe wrappers for opaque upstream identifiers
//! - [`enums`] -- Competitor side and change notification types
//! - [`structs`] -- Raw (ID-encoded) and human-readable event records

pub mod enums;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{ChangeNotification, CompetitorSide};
pub use ids::{EventId, MappingId};
pub use structs::{
    Competitor, Competitors, PRE_MATCH_STATUS, PeriodScore, REMOVED_STATUS, RawEvent,
    SCORES_NOT_AVAILABLE, Scores, SportEvent,
};

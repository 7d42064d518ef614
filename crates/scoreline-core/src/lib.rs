//! Reconciliation core for the Scoreline live sport event feed.
//!
//! Two upstream feeds are polled on independent intervals: a mapping feed of
//! opaque ID to name pairs, and an event feed of ID-encoded CSV rows. This
//! crate keeps a time-versioned mapping cache, reconciles the event feed
//! into a live table and an archive, and exposes the readable state through
//! [`EventQuery`].
//!
//! # Modules
//!
//! - [`cache`] -- Versioned mapping cache with point-in-time lookups and pruning
//! - [`config`] -- YAML configuration with environment overrides
//! - [`engine`] -- Per-tick reconciliation, cycle reports, and the query surface
//! - [`error`] -- Feed, mapping, row, and sync error types
//! - [`feed`] -- Feed traits and their HTTP implementations
//! - [`mapping`] -- Mapping feed sync and ID resolution
//! - [`runner`] -- Interval task runner with start/stop controls
//! - [`tables`] -- Live and archived event tables

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod feed;
pub mod mapping;
pub mod runner;
pub mod tables;

mod locks;

pub use cache::{MappingVersion, PruneStats, VersionedMappingCache};
pub use config::{ConfigError, ServiceConfig};
pub use engine::{CycleOutcome, CycleReport, EngineSettings, EventQuery, ReconciliationEngine};
pub use error::{FeedError, MappingError, RowError, SyncError};
pub use feed::{EventFeed, HttpEventFeed, HttpMappingFeed, MappingFeed};
pub use mapping::{MappingSyncTask, RefreshOutcome};
pub use runner::IntervalTaskRunner;
pub use tables::{ArchivedEventTable, LiveEventTable};

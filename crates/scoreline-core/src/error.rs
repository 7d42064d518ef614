//! Error taxonomy for the reconciliation core.
//!
//! Every error here is scoped to the smallest unit that can fail: a fetch,
//! a field lookup, or a feed row. Only [`SyncError`] ever reaches the
//! scheduler, and only when the bootstrap mapping fetch is exhausted.

use scoreline_types::MappingId;

/// Failure fetching or decoding one of the upstream feeds.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// The HTTP request could not be completed.
    #[error("request to {url} failed: {source}")]
    Request {
        /// Feed URL.
        url: String,
        /// Underlying transport error.
        source: reqwest::Error,
    },

    /// The feed answered with a non-success status.
    #[error("{url} returned {status}")]
    Status {
        /// Feed URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// The response body was not the expected JSON shape.
    #[error("failed to decode response from {url}: {source}")]
    Decode {
        /// Feed URL.
        url: String,
        /// Underlying decode error.
        source: reqwest::Error,
    },

    /// The payload field was absent or blank.
    #[error("feed returned an empty payload")]
    EmptyPayload,
}

/// Failure resolving an ID or a name through the mapping cache.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    /// No name is known for this ID (at the requested time).
    #[error("no mapping for id '{id}'")]
    Missing {
        /// The unresolved ID.
        id: MappingId,
    },

    /// No ID currently maps to this name.
    #[error("no id maps to name '{name}'")]
    UnknownName {
        /// The name that was looked up.
        name: String,
    },
}

/// Reason a single event feed row was skipped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RowError {
    /// The first column (event ID) was empty.
    #[error("row has no event id")]
    MissingId,

    /// Fewer than the six mandatory columns were present.
    #[error("row has {found} fields, at least 6 required")]
    TooFewFields {
        /// Number of comma-separated fields found.
        found: usize,
    },

    /// A referenced ID or the pre-match status name did not resolve.
    #[error(transparent)]
    Mapping(#[from] MappingError),
}

/// Failure of a whole scheduled reconciliation tick.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The bootstrap mapping refresh failed on every attempt.
    #[error("bootstrap mapping refresh failed after {attempts} attempts: {source}")]
    BootstrapExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Error of the last attempt.
        source: FeedError,
    },
}

//! Error types for the service binary.

/// Top-level error for the service binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: scoreline_core::ConfigError,
    },

    /// The shared HTTP client could not be built.
    #[error("feed client error: {source}")]
    Feed {
        /// The underlying feed error.
        #[from]
        source: scoreline_core::FeedError,
    },

    /// The query server failed to start or crashed.
    #[error("server error: {source}")]
    Server {
        /// The underlying server error.
        #[from]
        source: scoreline_observer::ServerError,
    },

    /// Waiting for the shutdown signal failed.
    #[error("signal error: {source}")]
    Signal {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The server task panicked or was cancelled.
    #[error("server task error: {message}")]
    Task {
        /// Description of the join failure.
        message: String,
    },
}

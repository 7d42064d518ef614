//! Configuration loading and typed config structures for Scoreline.
//!
//! The service reads `scoreline-config.yaml` from the working directory when
//! it exists and falls back to defaults otherwise. Every section and field
//! is optional. A handful of environment variables override the YAML:
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `MAPPINGS_API` | `feeds.mappings_url` |
//! | `SPORT_EVENTS_API` | `feeds.events_url` |
//! | `POLLING_INTERVAL_MS` | `polling.mapping_interval_ms` and `polling.event_interval_ms` |
//! | `PORT` | `server.port` |

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::engine::EngineSettings;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value parsed but is out of range, or an override is malformed.
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// Dotted path or environment variable of the offending value.
        field: String,
        /// What is wrong with it.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level service configuration.
///
/// Mirrors the structure of `scoreline-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServiceConfig {
    /// Upstream feed locations.
    #[serde(default)]
    pub feeds: FeedsConfig,

    /// Poll intervals.
    #[serde(default)]
    pub polling: PollingConfig,

    /// Mapping history retention.
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Bootstrap mapping retry policy.
    #[serde(default)]
    pub bootstrap: BootstrapConfig,

    /// HTTP query server.
    #[serde(default)]
    pub server: ServerSection,

    /// Logging output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Load configuration from a YAML file, then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value or override is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Load `path` if it exists, defaults otherwise; then apply overrides.
    ///
    /// # Errors
    ///
    /// Same as [`from_file`](Self::from_file).
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            return Self::from_file(path);
        }
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string, then apply overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value or override is out of range.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a numeric variable does not parse.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a numeric variable does not parse.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("MAPPINGS_API") {
            self.feeds.mappings_url = url;
        }
        if let Some(url) = lookup("SPORT_EVENTS_API") {
            self.feeds.events_url = url;
        }
        if let Some(raw) = lookup("POLLING_INTERVAL_MS") {
            let interval: u64 = parse_var("POLLING_INTERVAL_MS", &raw)?;
            self.polling.mapping_interval_ms = interval;
            self.polling.event_interval_ms = interval;
        }
        if let Some(raw) = lookup("PORT") {
            self.server.port = parse_var("PORT", &raw)?;
        }
        Ok(())
    }

    /// Check ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("feeds.request_timeout_ms", self.feeds.request_timeout_ms),
            ("polling.mapping_interval_ms", self.polling.mapping_interval_ms),
            ("polling.event_interval_ms", self.polling.event_interval_ms),
            ("retention.max_age_ms", self.retention.max_age_ms),
            ("retention.prune_interval_ms", self.retention.prune_interval_ms),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(invalid(field, "must be greater than zero"));
            }
        }
        if self.bootstrap.max_attempts == 0 {
            return Err(invalid("bootstrap.max_attempts", "must be at least 1"));
        }
        for (field, url) in [
            ("feeds.mappings_url", &self.feeds.mappings_url),
            ("feeds.events_url", &self.feeds.events_url),
        ] {
            if url.trim().is_empty() {
                return Err(invalid(field, "must not be empty"));
            }
        }
        Ok(())
    }

    /// Bootstrap policy for the reconciliation engine.
    pub const fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            bootstrap_attempts: self.bootstrap.max_attempts,
            bootstrap_base_delay: Duration::from_millis(self.bootstrap.base_delay_ms),
        }
    }
}

fn parse_var<T: core::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: core::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| invalid(key, &format!("'{raw}': {e}")))
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_owned(),
        reason: reason.to_owned(),
    }
}

/// Upstream feed configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeedsConfig {
    /// Mapping feed URL.
    #[serde(default = "default_mappings_url")]
    pub mappings_url: String,

    /// Event feed URL.
    #[serde(default = "default_events_url")]
    pub events_url: String,

    /// Per-request timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl FeedsConfig {
    /// Per-request timeout.
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            mappings_url: default_mappings_url(),
            events_url: default_events_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Poll interval configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PollingConfig {
    /// Milliseconds between mapping refreshes.
    #[serde(default = "default_interval_ms")]
    pub mapping_interval_ms: u64,

    /// Milliseconds between reconciliation cycles.
    #[serde(default = "default_interval_ms")]
    pub event_interval_ms: u64,
}

impl PollingConfig {
    /// Interval between mapping refreshes.
    pub const fn mapping_interval(&self) -> Duration {
        Duration::from_millis(self.mapping_interval_ms)
    }

    /// Interval between reconciliation cycles.
    pub const fn event_interval(&self) -> Duration {
        Duration::from_millis(self.event_interval_ms)
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            mapping_interval_ms: default_interval_ms(),
            event_interval_ms: default_interval_ms(),
        }
    }
}

/// Mapping history retention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetentionConfig {
    /// Versions older than this many milliseconds are pruned.
    #[serde(default = "default_max_age_ms")]
    pub max_age_ms: u64,

    /// Milliseconds between prune passes.
    #[serde(default = "default_prune_interval_ms")]
    pub prune_interval_ms: u64,
}

impl RetentionConfig {
    /// Maximum age of a retained mapping version.
    pub const fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms)
    }

    /// Interval between prune passes.
    pub const fn prune_interval(&self) -> Duration {
        Duration::from_millis(self.prune_interval_ms)
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age_ms: default_max_age_ms(),
            prune_interval_ms: default_prune_interval_ms(),
        }
    }
}

/// Bootstrap mapping retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BootstrapConfig {
    /// Total attempts per tick.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Milliseconds before the first retry, doubled per retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

/// HTTP server bind address.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerSection {
    /// Host to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_mappings_url() -> String {
    String::from("http://localhost:3000/api/mappings")
}

fn default_events_url() -> String {
    String::from("http://localhost:3000/api/state")
}

const fn default_request_timeout_ms() -> u64 {
    5000
}

const fn default_interval_ms() -> u64 {
    1000
}

const fn default_max_age_ms() -> u64 {
    600_000
}

const fn default_prune_interval_ms() -> u64 {
    60_000
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_base_delay_ms() -> u64 {
    1000
}

fn default_host() -> String {
    String::from("0.0.0.0")
}

const fn default_port() -> u16 {
    3001
}

fn default_log_level() -> String {
    String::from("info")
}

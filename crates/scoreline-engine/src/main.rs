//! Service binary for the Scoreline live sport event feed.
//!
//! Wires the mapping cache, the mapping sync task, the reconciliation
//! engine, and the query API server together, then runs until `Ctrl-C`.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `scoreline-config.yaml` (or defaults)
//! 2. Initialize structured logging (tracing)
//! 3. Create the mapping cache and start pruning
//! 4. Build the HTTP feed clients
//! 5. Start mapping sync polling
//! 6. Start event reconciliation polling
//! 7. Start the query API server
//! 8. Wait for `Ctrl-C`, then stop everything in reverse order

mod error;

use std::path::Path;
use std::sync::Arc;

use scoreline_core::config::LoggingConfig;
use scoreline_core::feed::http_client;
use scoreline_core::{
    EventQuery, HttpEventFeed, HttpMappingFeed, MappingSyncTask, ReconciliationEngine, ServiceConfig,
    VersionedMappingCache,
};
use scoreline_observer::{AppState, ServerConfig};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;

/// Path of the optional configuration file, relative to the working directory.
const CONFIG_PATH: &str = "scoreline-config.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration is invalid, the HTTP client cannot be
/// built, or the query server fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config = ServiceConfig::load_or_default(Path::new(CONFIG_PATH)).map_err(EngineError::from)?;

    // 2. Initialize structured logging.
    init_tracing(&config.logging);
    info!("scoreline-engine starting");
    info!(
        mappings_url = config.feeds.mappings_url,
        events_url = config.feeds.events_url,
        mapping_interval_ms = config.polling.mapping_interval_ms,
        event_interval_ms = config.polling.event_interval_ms,
        max_age_ms = config.retention.max_age_ms,
        "Configuration loaded"
    );

    // 3. Create the mapping cache.
    let cache = Arc::new(VersionedMappingCache::new());
    cache.start_pruning(config.retention.max_age(), config.retention.prune_interval());

    // 4. Build feed clients.
    let client = http_client(config.feeds.request_timeout()).map_err(EngineError::from)?;
    let mapping_feed = HttpMappingFeed::new(client.clone(), config.feeds.mappings_url.clone());
    let event_feed = HttpEventFeed::new(client, config.feeds.events_url.clone());

    // 5. Start mapping sync.
    let sync = Arc::new(MappingSyncTask::new(mapping_feed, Arc::clone(&cache)));
    sync.start(config.polling.mapping_interval());

    // 6. Start reconciliation.
    let engine = Arc::new(ReconciliationEngine::new(
        event_feed,
        Arc::clone(&sync),
        config.engine_settings(),
    ));
    engine.start(config.polling.event_interval());

    // 7. Start the query API server.
    let server_config = ServerConfig {
        host: config.server.host.clone(),
        port: config.server.port,
    };
    let events: Arc<dyn EventQuery> = Arc::clone(&engine) as Arc<dyn EventQuery>;
    let app_state = Arc::new(AppState::new(events, engine.notification_sender()));
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let mut server = tokio::spawn(async move {
        scoreline_observer::start_server(&server_config, app_state, async move {
            let _ = shutdown_rx.changed().await;
        })
        .await
    });

    // 8. Run until Ctrl-C or the server exits on its own.
    let early_exit = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(EngineError::from)?;
            info!("Shutdown signal received");
            None
        }
        result = &mut server => Some(result),
    };

    engine.stop();
    sync.stop();
    cache.destroy();

    let result = match early_exit {
        Some(result) => result,
        None => {
            if shutdown_tx.send(true).is_err() {
                warn!("Query server already stopped");
            }
            server.await
        }
    };
    result
        .map_err(|e| EngineError::Task {
            message: e.to_string(),
        })?
        .map_err(EngineError::from)?;

    info!("scoreline-engine shutdown complete");
    Ok(())
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

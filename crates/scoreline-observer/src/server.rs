//! Binding and serving the query API.
//!
//! [`start_server`] serves [`build_router`] until the caller's shutdown
//! future resolves. The service binary resolves it on `Ctrl-C`, after the
//! polling runners have been stopped, so the last reconciled state stays
//! readable while the process winds down.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::router::build_router;
use crate::state::AppState;

/// Bind address of the query API.
///
/// Defaults to `0.0.0.0:3001`, the port dashboard clients poll.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::from("0.0.0.0"),
            port: 3001,
        }
    }
}

impl ServerConfig {
    /// Parse `host:port` into a socket address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the host is not an IP literal.
    pub fn socket_addr(&self) -> Result<SocketAddr, ServerError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ServerError::Bind(format!("invalid address {}:{}: {e}", self.host, self.port)))
    }
}

/// Serve the query API until `shutdown` resolves.
///
/// In-flight requests are drained before returning.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] for a bad or busy address and
/// [`ServerError::Serve`] if the accept loop fails.
pub async fn start_server<S>(
    config: &ServerConfig,
    state: Arc<AppState>,
    shutdown: S,
) -> Result<(), ServerError>
where
    S: Future<Output = ()> + Send + 'static,
{
    let addr = config.socket_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Bind(format!("bind failed on {addr}: {e}")))?;

    info!(%addr, "Query API listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ServerError::Serve(e.to_string()))?;

    info!(%addr, "Query API stopped");
    Ok(())
}

/// Failure to bring up or keep serving the query API.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The address was invalid or already in use.
    #[error("bind error: {0}")]
    Bind(String),

    /// The accept loop failed.
    #[error("serve error: {0}")]
    Serve(String),
}

//! Query API server for the Scoreline live sport event feed.
//!
//! This crate provides an Axum HTTP server that exposes:
//!
//! - **REST endpoints** for the reconciled state (`/client/state`,
//!   `/client/state/{id}`, `/client/removed`) and a `/health` probe
//! - **`WebSocket` endpoint** (`/ws/changes`) streaming every change
//!   notification via [`tokio::sync::broadcast`]
//!
//! # Architecture
//!
//! Handlers read through the [`EventQuery`] trait object held in
//! [`AppState`]; they never touch the engine's tables directly, and a read
//! never waits on a reconciliation cycle.
//!
//! [`EventQuery`]: scoreline_core::EventQuery

pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod state;
pub mod ws;

// Re-export primary types for convenience.
pub use router::build_router;
pub use server::{ServerConfig, ServerError, start_server};
pub use state::AppState;

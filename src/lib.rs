//! Inference relay worker built with Rust.
//!
//! Joins a per-worker channel on the platform socket, receives completion
//! jobs, runs them against a local Ollama-compatible backend and publishes
//! results or streamed chunks back on the channel.

pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod socket;

pub use config::{Config, SessionConfig, SessionOptions};
pub use error::{RelayError, RelayResult};
pub use handlers::http::AppState;
pub use services::supervisor::{Supervisor, WorkerControl, WorkerHandle};

use axum::routing::{get, post};
use handlers::http;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the status router (health, status, logs, stop). Used by main and by integration tests.
pub fn create_app(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/health", get(http::health))
        .route("/status", get(http::status))
        .route("/logs", get(http::logs).delete(http::clear_logs))
        .route("/stop", post(http::stop))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

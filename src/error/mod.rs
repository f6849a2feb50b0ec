//! Relay error types for robust error handling.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Relay-level errors.
///
/// Per-request failures (`Validation`, `Backend*`, `ModelNotAvailable` for a
/// single job) are turned into error events on the channel; the rest end the
/// session.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Backend unreachable: {0}")]
    BackendUnreachable(String),

    #[error("HTTP error! status: {status}")]
    BackendError { status: u16 },

    #[error("Model {0} not downloaded")]
    ModelNotAvailable(String),

    #[error("Failed to join channel due to {reason}")]
    ChannelJoinFailed { reason: String },

    #[error("Socket error: {0}")]
    SocketError(String),

    #[error("Socket closed")]
    SocketClosed,

    #[error("Worker aborted")]
    Aborted,

    #[error("No worker session has been started")]
    NoSession,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Backend request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl RelayError {
    /// Cooperative cancellation is a clean stop, not a failure.
    pub fn is_aborted(&self) -> bool {
        matches!(self, RelayError::Aborted)
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = match &self {
            RelayError::Config(_) | RelayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::InvalidArgument(_)
            | RelayError::Validation(_)
            | RelayError::Serialization(_) => StatusCode::BAD_REQUEST,
            RelayError::BackendUnreachable(_)
            | RelayError::BackendError { .. }
            | RelayError::Http(_) => StatusCode::BAD_GATEWAY,
            RelayError::ModelNotAvailable(_) => StatusCode::NOT_FOUND,
            RelayError::ChannelJoinFailed { .. }
            | RelayError::SocketError(_)
            | RelayError::SocketClosed
            | RelayError::WebSocket(_) => StatusCode::SERVICE_UNAVAILABLE,
            RelayError::Aborted | RelayError::NoSession => StatusCode::CONFLICT,
        };

        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

pub type RelayResult<T> = Result<T, RelayError>;

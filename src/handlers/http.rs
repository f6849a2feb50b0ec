//! Local status surface: health, status, logs and stop.

use axum::{extract::State, http::StatusCode, Json};
use serde_json::json;

use crate::error::RelayError;
use crate::services::supervisor::WorkerControl;

/// Shared state for the status router.
#[derive(Clone)]
pub struct AppState {
    pub control: WorkerControl,
}

impl AppState {
    pub fn new(control: WorkerControl) -> Self {
        Self { control }
    }

    pub fn control(&self) -> &WorkerControl {
        &self.control
    }
}

/// GET /health: liveness probe.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "service": "relay-worker" })),
    )
}

/// GET /status: running flag, model, session state and in-flight requests.
pub async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!(state.control().snapshot()))
}

/// GET /logs: most recent log lines, newest first.
pub async fn logs(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "logs": state.control().logs() }))
}

/// DELETE /logs
pub async fn clear_logs(State(state): State<AppState>) -> StatusCode {
    state.control().clear_logs();
    StatusCode::NO_CONTENT
}

/// POST /stop: abort the running session. Repeated calls are harmless.
pub async fn stop(State(state): State<AppState>) -> Result<Json<serde_json::Value>, RelayError> {
    let fired = state.control().abort().ok_or(RelayError::NoSession)?;
    Ok(Json(json!({ "ok": true, "aborted": fired })))
}

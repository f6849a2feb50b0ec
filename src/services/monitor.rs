//! Worker monitor: running flag, session state and a bounded log ring.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use serde::Serialize;

use crate::models::status::{LogEntry, SessionState, WorkerStatus};

pub const DEFAULT_MAX_LOGS: usize = 30;

/// Snapshot served by `GET /status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub running: bool,
    pub model_running: Option<String>,
    pub state: SessionState,
    pub in_flight: usize,
}

struct MonitorState {
    running: bool,
    model: Option<String>,
    state: SessionState,
    in_flight: usize,
    logs: VecDeque<LogEntry>,
    max_logs: usize,
}

/// Shared view of the current worker, updated by the session and read by the status surface.
#[derive(Clone)]
pub struct WorkerMonitor {
    inner: Arc<RwLock<MonitorState>>,
}

impl Default for WorkerMonitor {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_LOGS)
    }
}

impl WorkerMonitor {
    pub fn with_capacity(max_logs: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(MonitorState {
                running: false,
                model: None,
                state: SessionState::Disconnected,
                in_flight: 0,
                logs: VecDeque::with_capacity(max_logs),
                max_logs,
            })),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, MonitorState> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, MonitorState> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a log line; newest first, oldest evicted past capacity.
    pub fn record(&self, message: &str, status: Option<WorkerStatus>) {
        let mut s = self.write();
        match status {
            Some(WorkerStatus::Running) => s.running = true,
            Some(WorkerStatus::Stopped) => s.running = false,
            None => {}
        }
        if s.max_logs == 0 {
            return;
        }
        if s.logs.len() >= s.max_logs {
            s.logs.pop_back();
        }
        s.logs.push_front(LogEntry {
            at: Utc::now(),
            message: message.to_string(),
            status,
        });
    }

    pub fn set_model(&self, model: Option<String>) {
        self.write().model = model;
    }

    pub fn set_state(&self, state: SessionState) {
        let mut s = self.write();
        s.state = state;
        if state.is_terminal() {
            s.in_flight = 0;
        }
    }

    pub fn request_started(&self) {
        self.write().in_flight += 1;
    }

    pub fn request_finished(&self) {
        let mut s = self.write();
        s.in_flight = s.in_flight.saturating_sub(1);
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let s = self.read();
        StatusSnapshot {
            running: s.running,
            model_running: if s.running { s.model.clone() } else { None },
            state: s.state,
            in_flight: s.in_flight,
        }
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.read().logs.iter().cloned().collect()
    }

    pub fn clear_logs(&self) {
        self.write().logs.clear();
    }
}

//! Log and status reporting towards the caller's `messageFn`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::models::status::{SessionState, WorkerStatus};
use crate::services::monitor::WorkerMonitor;

/// Callback invoked for every log line and status transition.
pub type MessageFn = Arc<dyn Fn(&str, Option<WorkerStatus>) + Send + Sync>;

/// Per-session reporter. Emits `"stopped"` at most once.
#[derive(Clone)]
pub struct Reporter {
    message_fn: MessageFn,
    monitor: WorkerMonitor,
    stopped: Arc<AtomicBool>,
}

impl Reporter {
    pub fn new(message_fn: MessageFn, monitor: WorkerMonitor) -> Self {
        Self {
            message_fn,
            monitor,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn monitor(&self) -> &WorkerMonitor {
        &self.monitor
    }

    pub fn log(&self, message: impl AsRef<str>) {
        self.emit(message.as_ref(), None);
    }

    pub fn running(&self, message: impl AsRef<str>) {
        self.emit(message.as_ref(), Some(WorkerStatus::Running));
    }

    /// Report the session as stopped. Later calls are logged without a status.
    pub fn stopped(&self, message: impl AsRef<str>) -> bool {
        let first = !self.stopped.swap(true, Ordering::SeqCst);
        let status = first.then_some(WorkerStatus::Stopped);
        self.emit(message.as_ref(), status);
        first
    }

    pub fn set_state(&self, state: SessionState) {
        debug!(state = ?state, "session state");
        self.monitor.set_state(state);
    }

    fn emit(&self, message: &str, status: Option<WorkerStatus>) {
        match status {
            Some(status) => info!(status = status.as_str(), "{}", message),
            None => info!("{}", message),
        }
        self.monitor.record(message, status);
        (self.message_fn)(message, status);
    }
}

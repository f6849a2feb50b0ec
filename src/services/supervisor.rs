//! Session supervisor: starts channel sessions for a UI or CLI, owns the
//! abort handle and the log/status callback.

use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::{Config, SessionConfig, SessionOptions};
use crate::error::{RelayError, RelayResult};
use crate::models::status::LogEntry;
use crate::services::abort::{abort_pair, AbortHandle};
use crate::services::backend::{InferenceBackend, OllamaBackend};
use crate::services::monitor::{StatusSnapshot, WorkerMonitor};
use crate::services::reporter::{MessageFn, Reporter};
use crate::services::session::ChannelSession;

/// Starts sessions against one backend and reports through one `messageFn`.
pub struct Supervisor<B: InferenceBackend> {
    backend: Arc<B>,
    message_fn: MessageFn,
    options: SessionOptions,
    control: WorkerControl,
}

impl<B: InferenceBackend> Clone for Supervisor<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            message_fn: self.message_fn.clone(),
            options: self.options,
            control: self.control.clone(),
        }
    }
}

impl Supervisor<OllamaBackend> {
    /// Supervisor talking to the backend at `config.session.llm_url`.
    pub fn from_config(config: &Config, message_fn: MessageFn) -> RelayResult<Self> {
        let backend = OllamaBackend::new(&config.session.llm_url)?;
        Ok(Self::new(Arc::new(backend), message_fn).with_options(config.options))
    }
}

impl<B: InferenceBackend> Supervisor<B> {
    pub fn new(backend: Arc<B>, message_fn: MessageFn) -> Self {
        Self {
            backend,
            message_fn,
            options: SessionOptions::default(),
            control: WorkerControl::new(WorkerMonitor::default()),
        }
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options.sanitized();
        self
    }

    /// Handle for front-ends that only need status and stop.
    pub fn control(&self) -> WorkerControl {
        self.control.clone()
    }

    pub fn monitor(&self) -> &WorkerMonitor {
        &self.control.monitor
    }

    /// Start a session in the background. A session still running from an
    /// earlier `start` is aborted, and the new one does not begin until the
    /// old one has reported `"stopped"`, so at most one channel join is live.
    pub fn start(&self, config: SessionConfig) -> WorkerHandle {
        let (abort, signal) = abort_pair();
        let (finished, done) = oneshot::channel::<()>();
        let previous = self.control.replace(ActiveSession {
            abort: abort.clone(),
            done,
        });
        let previous_done = previous.map(|previous| {
            previous.abort.abort();
            previous.done
        });

        let reporter = Reporter::new(self.message_fn.clone(), self.control.monitor.clone());
        let monitor = self.control.monitor.clone();
        let session = ChannelSession::new(
            config.clone(),
            self.options,
            self.backend.clone(),
            reporter.clone(),
            signal,
        );
        let task = tokio::spawn(async move {
            // resolves once the previous task drops its sender
            if let Some(done) = previous_done {
                let _ = done.await;
            }
            let echo = serde_json::to_string(&config.redacted()).unwrap_or_default();
            reporter.log(format!("Starting worker with options: {}", echo));
            monitor.set_model(Some(config.model_name.clone()));

            let outcome = session.run().await;
            drop(finished);
            outcome
        });
        WorkerHandle { abort, task }
    }

    /// Start a session and wait for it to end.
    pub async fn run(&self, config: SessionConfig) -> RelayResult<()> {
        self.start(config).wait().await
    }

    /// Abort the current session. `false` when there is none or it was already aborted.
    pub fn abort(&self) -> bool {
        self.control.abort().unwrap_or(false)
    }
}

/// Running session started by a [`Supervisor`].
pub struct WorkerHandle {
    abort: AbortHandle,
    task: JoinHandle<RelayResult<()>>,
}

impl WorkerHandle {
    /// Idempotent; `true` only for the call that fired the signal.
    pub fn abort(&self) -> bool {
        self.abort.abort()
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn wait(self) -> RelayResult<()> {
        self.task
            .await
            .map_err(|e| RelayError::Internal(anyhow::anyhow!("session task: {}", e)))?
    }
}

/// Abort handle of the latest session and a receiver that resolves when its task ends.
struct ActiveSession {
    abort: AbortHandle,
    done: oneshot::Receiver<()>,
}

/// Backend-agnostic view of the supervisor: status, logs and stop.
#[derive(Clone)]
pub struct WorkerControl {
    monitor: WorkerMonitor,
    current: Arc<Mutex<Option<ActiveSession>>>,
}

impl WorkerControl {
    fn new(monitor: WorkerMonitor) -> Self {
        Self {
            monitor,
            current: Arc::new(Mutex::new(None)),
        }
    }

    fn replace(&self, next: ActiveSession) -> Option<ActiveSession> {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        current.replace(next)
    }

    /// `None` when no session was ever started; otherwise whether this call fired the abort.
    pub fn abort(&self) -> Option<bool> {
        let current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        current.as_ref().map(|session| session.abort.abort())
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.monitor.snapshot()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.monitor.logs()
    }

    pub fn clear_logs(&self) {
        self.monitor.clear_logs()
    }
}

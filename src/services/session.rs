//! Channel session: probe, connect, join, then relay jobs between the
//! platform channel and the inference backend until the socket goes away.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info_span, warn, Instrument};

use crate::config::{SessionConfig, SessionOptions};
use crate::error::{RelayError, RelayResult};
use crate::models::channel::{
    ChannelTopic, PHOENIX_TOPIC, PHX_CLOSE, PHX_ERROR, PHX_REPLY, TOPIC_REQUEST,
};
use crate::models::event::{JoinPayload, PhoenixMessage, RelayEvent, ReplyStatus};
use crate::models::request::JobRequest;
use crate::models::status::SessionState;
use crate::services::abort::AbortSignal;
use crate::services::backend::InferenceBackend;
use crate::services::identity::WorkerIdentity;
use crate::services::reporter::Reporter;
use crate::services::validator::{parse_request, Rejection};
use crate::socket::{ChannelPublisher, FrameReader, PhoenixSocket, SocketSender};

/// One worker session over one socket connection. Not restartable: call
/// `run` once; reconnecting means building a new session.
pub struct ChannelSession<B: InferenceBackend> {
    config: SessionConfig,
    options: SessionOptions,
    identity: WorkerIdentity,
    topic: ChannelTopic,
    backend: Arc<B>,
    reporter: Reporter,
    signal: AbortSignal,
}

impl<B: InferenceBackend> ChannelSession<B> {
    pub fn new(
        config: SessionConfig,
        options: SessionOptions,
        backend: Arc<B>,
        reporter: Reporter,
        signal: AbortSignal,
    ) -> Self {
        let identity = WorkerIdentity::new(&config.api_key, &config.salt);
        let topic = identity.topic();
        Self {
            config,
            options: options.sanitized(),
            identity,
            topic,
            backend,
            reporter,
            signal,
        }
    }

    /// Run until the socket closes, a startup step fails, or the session is
    /// aborted. Reports `"stopped"` exactly once on the way out. Abort is a
    /// clean exit and yields `Ok(())`.
    pub async fn run(self) -> RelayResult<()> {
        let span = info_span!("session", topic = %self.topic, model = %self.config.model_name);
        let outcome = self.drive().instrument(span).await;
        self.finish(&outcome);
        match outcome {
            Err(e) if e.is_aborted() => Ok(()),
            other => other,
        }
    }

    async fn drive(&self) -> RelayResult<()> {
        self.reporter.log("Starting worker");
        self.reporter
            .log(format!("Worker ID - {}", self.identity.derived_id()));
        self.reporter.log(format!("Channel - {}", self.topic));
        self.reporter
            .log(format!("Model - {}", self.config.model_name));

        let available = self
            .signal
            .guard(self.backend.probe_model(&self.config.model_name))
            .await??;
        if !available {
            return Err(RelayError::ModelNotAvailable(self.config.model_name.clone()));
        }

        self.transition(SessionState::Connecting);
        let mut socket = self
            .signal
            .guard(PhoenixSocket::connect(&self.config.server_url))
            .await??;
        self.reporter.log("Connected to the socket");

        let sender = socket.sender.clone();
        let result = self.serve(sender, &mut socket.reader).await;
        socket.shutdown().await;
        result
    }

    async fn serve(&self, sender: SocketSender, reader: &mut FrameReader) -> RelayResult<()> {
        self.transition(SessionState::Joining);
        let join_ref = self.join(&sender, reader).await?;

        self.transition(SessionState::Ready);
        self.reporter
            .running(format!("Socket joined channel {}", self.topic));

        let handler = Arc::new(RequestHandler {
            backend: self.backend.clone(),
            publisher: ChannelPublisher::new(sender.clone(), self.topic.as_str(), &join_ref),
            signal: self.signal.clone(),
            reporter: self.reporter.clone(),
            model: self.config.model_name.clone(),
        });
        self.dispatch(handler, &sender, reader).await
    }

    /// Send `phx_join` and wait for its reply. Returns the join ref.
    async fn join(&self, sender: &SocketSender, reader: &mut FrameReader) -> RelayResult<String> {
        let join_ref = sender.next_ref();
        let payload = JoinPayload {
            model: self.config.model_name.clone(),
            key: self.config.api_key.clone(),
            salt: self.config.salt.clone(),
        };
        self.signal
            .guard(sender.send(&PhoenixMessage::join(self.topic.as_str(), &join_ref, &payload)))
            .await??;

        let deadline = tokio::time::sleep(self.options.join_timeout);
        tokio::pin!(deadline);
        let mut signal = self.signal.clone();
        loop {
            let frame = tokio::select! {
                biased;
                _ = signal.aborted() => return Err(RelayError::Aborted),
                _ = &mut deadline => {
                    return Err(RelayError::ChannelJoinFailed { reason: "timeout".to_string() });
                }
                frame = reader.next() => frame,
            };
            let msg = match frame {
                None => return Err(RelayError::SocketClosed),
                Some(frame) => frame?,
            };
            if msg.topic != self.topic.as_str() {
                debug!(topic = %msg.topic, event = %msg.event, "ignoring frame while joining");
                continue;
            }
            if msg.is_reply_to(&join_ref) {
                return match msg.reply() {
                    ReplyStatus::Ok => Ok(join_ref),
                    ReplyStatus::Error { reason } => Err(RelayError::ChannelJoinFailed { reason }),
                };
            }
            if msg.event == PHX_ERROR || msg.event == PHX_CLOSE {
                return Err(RelayError::ChannelJoinFailed { reason: msg.event });
            }
        }
    }

    /// Read inbound frames serially; each request runs on its own task.
    async fn dispatch(
        &self,
        handler: Arc<RequestHandler<B>>,
        sender: &SocketSender,
        reader: &mut FrameReader,
    ) -> RelayResult<()> {
        let mut tasks = JoinSet::new();
        let period = self.options.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut pending_heartbeat: Option<String> = None;
        let mut signal = self.signal.clone();

        loop {
            tokio::select! {
                biased;
                _ = signal.aborted() => return Err(RelayError::Aborted),
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "request task ended abnormally");
                    }
                }
                _ = heartbeat.tick() => {
                    if pending_heartbeat.is_some() {
                        return Err(RelayError::SocketError("heartbeat timeout".to_string()));
                    }
                    let msg_ref = sender.next_ref();
                    self.signal
                        .guard(sender.send(&PhoenixMessage::heartbeat(&msg_ref)))
                        .await??;
                    pending_heartbeat = Some(msg_ref);
                }
                frame = reader.next() => {
                    let msg = match frame {
                        None => return Err(RelayError::SocketClosed),
                        Some(frame) => frame?,
                    };
                    if msg.topic == PHOENIX_TOPIC {
                        if pending_heartbeat.as_deref().is_some_and(|r| msg.is_reply_to(r)) {
                            pending_heartbeat = None;
                        }
                        continue;
                    }
                    if msg.topic != self.topic.as_str() {
                        debug!(topic = %msg.topic, event = %msg.event, "ignoring frame for foreign topic");
                        continue;
                    }
                    match msg.event.as_str() {
                        TOPIC_REQUEST => {
                            let handler = handler.clone();
                            tasks.spawn(handler.handle(msg.payload));
                        }
                        PHX_CLOSE => return Err(RelayError::SocketClosed),
                        PHX_ERROR => {
                            return Err(RelayError::SocketError("channel crashed on the server".to_string()));
                        }
                        PHX_REPLY => {}
                        other => debug!(event = %other, "ignoring unknown channel event"),
                    }
                }
            }
        }
    }

    fn transition(&self, next: SessionState) {
        self.reporter.set_state(next);
    }

    fn finish(&self, outcome: &RelayResult<()>) {
        let (state, message) = match outcome {
            Ok(()) => (SessionState::Disconnected, "Worker stopped".to_string()),
            Err(RelayError::Aborted) => (SessionState::Disconnected, "Worker aborted".to_string()),
            Err(RelayError::SocketClosed) => (SessionState::Disconnected, "Socket closed".to_string()),
            Err(RelayError::ChannelJoinFailed { reason }) => (
                SessionState::Failed,
                format!("Socket failed to join channel {} due to {}", self.topic, reason),
            ),
            Err(e @ (RelayError::SocketError(_) | RelayError::WebSocket(_))) => {
                (SessionState::Failed, e.to_string())
            }
            Err(e) => (SessionState::Failed, format!("Worker error: {}", e)),
        };
        self.transition(state);
        self.reporter.stopped(message);
    }
}

/// Per-request relay. Shared by every in-flight request of a session.
struct RequestHandler<B: InferenceBackend> {
    backend: Arc<B>,
    publisher: ChannelPublisher,
    signal: AbortSignal,
    reporter: Reporter,
    model: String,
}

impl<B: InferenceBackend> RequestHandler<B> {
    /// Validate, relay and publish exactly one terminal event. Never fails.
    async fn handle(self: Arc<Self>, raw: serde_json::Value) {
        let request = match parse_request(&raw) {
            Ok(request) => request,
            Err(Rejection { id: Some(id), error }) => {
                self.reporter
                    .log(format!("Rejected request {}: {}", id, error));
                self.emit(RelayEvent::error(id, error)).await;
                return;
            }
            Err(Rejection { id: None, error }) => {
                warn!(error = %error, "dropping request without a usable id");
                self.reporter
                    .log(format!("Dropped request without id: {}", error));
                return;
            }
        };

        let id = request.id.clone();
        let span = info_span!("request", request_id = %id, stream = request.params.stream);
        async {
            self.reporter.log(format!("Received request: {}", id));
            self.reporter.monitor().request_started();
            let outcome = AssertUnwindSafe(self.relay(&request)).catch_unwind().await;
            self.reporter.monitor().request_finished();

            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) if e.is_aborted() => {
                    debug!("request cancelled by abort");
                    None
                }
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some("request handler panicked".to_string()),
            };
            if let Some(error) = failure {
                self.reporter
                    .log(format!("Request {} failed: {}", id, error));
                self.emit(RelayEvent::error(id.clone(), error)).await;
            }
        }
        .instrument(span)
        .await
    }

    /// Forward to the backend and publish the non-error events. An `Err` means
    /// no terminal event has been published yet.
    async fn relay(&self, request: &JobRequest) -> RelayResult<()> {
        if request.params.model != self.model {
            return Err(RelayError::ModelNotAvailable(request.params.model.clone()));
        }
        if request.params.stream {
            self.relay_stream(request).await
        } else {
            self.relay_result(request).await
        }
    }

    async fn relay_result(&self, request: &JobRequest) -> RelayResult<()> {
        let result = self
            .signal
            .guard(self.backend.complete(&request.params))
            .await??;
        self.emit(RelayEvent::Result {
            id: request.id.clone(),
            result,
        })
        .await;
        self.reporter
            .log(format!("Completed request {}", request.id));
        Ok(())
    }

    async fn relay_stream(&self, request: &JobRequest) -> RelayResult<()> {
        let id = &request.id;
        let mut chunks = self
            .signal
            .guard(self.backend.complete_stream(&request.params))
            .await??;

        self.emit(RelayEvent::ChunkStart { id: id.clone() }).await;
        self.reporter.log(format!("Streaming response for {}", id));

        while let Some(chunk) = self.signal.guard(chunks.next()).await? {
            let chunk = chunk?;
            self.emit(RelayEvent::Chunk {
                id: id.clone(),
                chunk,
            })
            .await;
        }

        self.emit(RelayEvent::ChunkEnd { id: id.clone() }).await;
        self.reporter.log(format!("Streaming complete for {}", id));
        Ok(())
    }

    /// Publish, logging instead of failing when the socket is already gone.
    async fn emit(&self, event: RelayEvent) {
        if let Err(e) = self.publisher.publish(&event).await {
            debug!(event = event.event_name(), request_id = event.id(), error = %e, "publish dropped");
        }
    }
}

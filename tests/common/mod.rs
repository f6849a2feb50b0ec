//! Shared fixtures: an in-process fake platform socket server, a scripted
//! inference backend and a `messageFn` recorder.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use relay_worker::models::{CompletionParams, PhoenixMessage, WorkerStatus};
use relay_worker::services::{ChunkStream, InferenceBackend, MessageFn, WorkerIdentity};
use relay_worker::{RelayError, RelayResult, SessionConfig};
use serde_json::{json, Value};
use tokio::sync::mpsc;

pub const API_KEY: &str = "test-api-key";
pub const SALT: &str = "test-salt";
pub const MODEL: &str = "llama3";

pub const WAIT: Duration = Duration::from_secs(5);

pub fn topic() -> String {
    WorkerIdentity::new(API_KEY, SALT).topic().to_string()
}

pub fn session_config(server_url: &str) -> SessionConfig {
    SessionConfig {
        model_name: MODEL.to_string(),
        api_key: API_KEY.to_string(),
        salt: SALT.to_string(),
        server_url: server_url.to_string(),
        llm_url: "http://127.0.0.1:9".to_string(),
    }
}

pub fn request(id: &str, prompt: &str, stream: bool) -> Value {
    json!({
        "id": id,
        "params": {
            "model": MODEL,
            "messages": [{"role": "user", "content": prompt}],
            "stream": stream
        }
    })
}

/// Poll `cond` until it holds or `WAIT` elapses.
pub async fn wait_until<F: Fn() -> bool>(cond: F) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

// ---------------------------------------------------------------------------
// messageFn recorder
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct Recorder {
    lines: Arc<Mutex<Vec<(String, Option<WorkerStatus>)>>>,
}

impl Recorder {
    pub fn message_fn(&self) -> MessageFn {
        let lines = self.lines.clone();
        Arc::new(move |message: &str, status: Option<WorkerStatus>| {
            lines.lock().unwrap().push((message.to_string(), status));
        })
    }

    pub fn lines(&self) -> Vec<(String, Option<WorkerStatus>)> {
        self.lines.lock().unwrap().clone()
    }

    pub fn count(&self, status: WorkerStatus) -> usize {
        self.lines()
            .iter()
            .filter(|(_, s)| *s == Some(status))
            .count()
    }

    pub fn stopped_message(&self) -> Option<String> {
        self.lines()
            .into_iter()
            .find(|(_, s)| *s == Some(WorkerStatus::Stopped))
            .map(|(m, _)| m)
    }

    pub async fn wait_for(&self, status: WorkerStatus) -> bool {
        wait_until(|| self.count(status) > 0).await
    }
}

// ---------------------------------------------------------------------------
// Scripted backend
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub enum Script {
    /// Non-streamed reply echoing the prompt; streamed reply of one chunk.
    Echo,
    Fail(u16),
    Stream {
        chunks: Vec<&'static str>,
        delay: Duration,
    },
    StreamThenFail {
        chunks: Vec<&'static str>,
    },
    Delay(Duration),
    /// Never answers; records when the call is dropped.
    Hang,
    Panic,
}

struct CancelFlag(Arc<AtomicBool>);

impl Drop for CancelFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub struct MockBackend {
    models: Vec<String>,
    scripts: Mutex<HashMap<String, Script>>,
    pub probes: AtomicUsize,
    pub calls: AtomicUsize,
    pub cancelled: Arc<AtomicBool>,
}

impl MockBackend {
    pub fn new(models: &[&str]) -> Self {
        Self {
            models: models.iter().map(|m| m.to_string()).collect(),
            scripts: Mutex::new(HashMap::new()),
            probes: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Behaviour for requests whose first message has `prompt` as content.
    pub fn script(self, prompt: &str, script: Script) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(prompt.to_string(), script);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn script_for(&self, params: &CompletionParams) -> (String, Script) {
        let prompt = params
            .messages
            .first()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&prompt)
            .cloned()
            .unwrap_or(Script::Echo);
        (prompt, script)
    }
}

#[async_trait]
impl InferenceBackend for MockBackend {
    async fn probe_model(&self, model_name: &str) -> RelayResult<bool> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        Ok(self.models.iter().any(|m| m == model_name))
    }

    async fn complete(&self, params: &CompletionParams) -> RelayResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (prompt, script) = self.script_for(params);
        match script {
            Script::Fail(status) => Err(RelayError::BackendError { status }),
            Script::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(json!({ "echo": prompt }))
            }
            Script::Hang => {
                let _flag = CancelFlag(self.cancelled.clone());
                std::future::pending::<RelayResult<Value>>().await
            }
            Script::Panic => panic!("backend exploded"),
            _ => Ok(json!({ "echo": prompt })),
        }
    }

    async fn complete_stream(&self, params: &CompletionParams) -> RelayResult<ChunkStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (prompt, script) = self.script_for(params);
        match script {
            Script::Fail(status) => Err(RelayError::BackendError { status }),
            Script::Stream { chunks, delay } => Ok(futures::stream::iter(chunks)
                .then(move |c| async move {
                    tokio::time::sleep(delay).await;
                    Ok::<String, RelayError>(c.to_string())
                })
                .boxed()),
            Script::StreamThenFail { chunks } => {
                let items: Vec<RelayResult<String>> = chunks
                    .into_iter()
                    .map(|c| Ok(c.to_string()))
                    .chain(std::iter::once(Err(RelayError::BackendUnreachable(
                        "connection reset".to_string(),
                    ))))
                    .collect();
                Ok(futures::stream::iter(items).boxed())
            }
            Script::Hang => {
                let flag = CancelFlag(self.cancelled.clone());
                Ok(futures::stream::pending::<RelayResult<String>>()
                    .map(move |item| {
                        let _keep = &flag;
                        item
                    })
                    .boxed())
            }
            Script::Panic => panic!("backend exploded"),
            _ => Ok(futures::stream::iter(vec![Ok(prompt)]).boxed()),
        }
    }
}

// ---------------------------------------------------------------------------
// Fake platform socket server
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub enum JoinReply {
    Ok,
    Error(&'static str),
    Silent,
}

enum Control {
    Frame(PhoenixMessage),
    Close,
}

#[derive(Clone)]
struct PlatformState {
    join_reply: JoinReply,
    answer_heartbeats: bool,
    inbound: mpsc::UnboundedSender<PhoenixMessage>,
    control: Arc<tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<Control>>>>,
    connections: Arc<AtomicUsize>,
}

pub struct FakePlatform {
    pub addr: SocketAddr,
    inbound: mpsc::UnboundedReceiver<PhoenixMessage>,
    control: mpsc::UnboundedSender<Control>,
    connections: Arc<AtomicUsize>,
    refs: AtomicUsize,
}

impl FakePlatform {
    pub async fn start(join_reply: JoinReply) -> Self {
        Self::start_with(join_reply, true).await
    }

    /// Like `start`, but heartbeats go unanswered when `answer_heartbeats` is false.
    pub async fn start_with(join_reply: JoinReply, answer_heartbeats: bool) -> Self {
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (control, control_rx) = mpsc::unbounded_channel();
        let connections = Arc::new(AtomicUsize::new(0));
        let state = PlatformState {
            join_reply,
            answer_heartbeats,
            inbound: inbound_tx,
            control: Arc::new(tokio::sync::Mutex::new(Some(control_rx))),
            connections: connections.clone(),
        };
        let app = axum::Router::new()
            .route("/websocket", get(ws_upgrade))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            addr,
            inbound,
            control,
            connections,
            refs: AtomicUsize::new(100),
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Push a frame on the worker topic.
    pub fn push(&self, event: &str, payload: Value) {
        let msg_ref = self.refs.fetch_add(1, Ordering::SeqCst).to_string();
        let frame = PhoenixMessage {
            join_ref: None,
            msg_ref: Some(msg_ref),
            topic: topic(),
            event: event.to_string(),
            payload,
        };
        let _ = self.control.send(Control::Frame(frame));
    }

    pub fn push_request(&self, payload: Value) {
        self.push("request", payload);
    }

    pub fn close(&self) {
        let _ = self.control.send(Control::Close);
    }

    /// Next frame the worker sent, heartbeats excluded.
    pub async fn next_frame(&mut self) -> Option<PhoenixMessage> {
        loop {
            let msg = tokio::time::timeout(WAIT, self.inbound.recv()).await.ok()??;
            if msg.event != "heartbeat" {
                return Some(msg);
            }
        }
    }

    /// Relay events (everything but join/heartbeat) until `done` matches one, inclusive.
    pub async fn events_until<F>(&mut self, done: F) -> Vec<PhoenixMessage>
    where
        F: Fn(&PhoenixMessage) -> bool,
    {
        let mut events = Vec::new();
        while let Some(msg) = self.next_frame().await {
            if msg.event == "phx_join" {
                continue;
            }
            let finished = done(&msg);
            events.push(msg);
            if finished {
                return events;
            }
        }
        panic!("timed out waiting for relay events; got {:?}", events);
    }

    /// Relay events observed within `window`.
    pub async fn drain_for(&mut self, window: Duration) -> Vec<PhoenixMessage> {
        let mut events = Vec::new();
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Some(msg)) = tokio::time::timeout_at(deadline, self.inbound.recv()).await {
            if msg.event != "heartbeat" && msg.event != "phx_join" {
                events.push(msg);
            }
        }
        events
    }
}

pub fn is_terminal_for(id: &'static str) -> impl Fn(&PhoenixMessage) -> bool {
    move |m| {
        m.payload["id"] == id && matches!(m.event.as_str(), "result" | "chunk_end" | "error")
    }
}

async fn ws_upgrade(State(state): State<PlatformState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| serve_socket(state, socket))
}

async fn serve_socket(state: PlatformState, socket: WebSocket) {
    state.connections.fetch_add(1, Ordering::SeqCst);
    let (mut sink, mut stream) = socket.split();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<PhoenixMessage>();
    let mut control = state.control.lock().await.take();

    let writer = tokio::spawn(async move {
        loop {
            let next = match control.as_mut() {
                Some(control) => tokio::select! {
                    reply = reply_rx.recv() => reply.map(Control::Frame),
                    ctl = control.recv() => ctl,
                },
                None => reply_rx.recv().await.map(Control::Frame),
            };
            match next {
                Some(Control::Frame(frame)) => {
                    let text = serde_json::to_string(&frame).unwrap();
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(Control::Close) => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                None => break,
            }
        }
    });

    while let Some(Ok(msg)) = stream.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(frame) = serde_json::from_str::<PhoenixMessage>(&text) else {
            continue;
        };
        let reply = match frame.event.as_str() {
            "phx_join" => match &state.join_reply {
                JoinReply::Ok => Some(json!({"status": "ok", "response": {}})),
                JoinReply::Error(reason) => {
                    Some(json!({"status": "error", "response": {"reason": reason}}))
                }
                JoinReply::Silent => None,
            },
            "heartbeat" if state.answer_heartbeats => {
                Some(json!({"status": "ok", "response": {}}))
            }
            _ => None,
        };
        if let Some(payload) = reply {
            let _ = reply_tx.send(PhoenixMessage {
                join_ref: frame.join_ref.clone(),
                msg_ref: frame.msg_ref.clone(),
                topic: frame.topic.clone(),
                event: "phx_reply".to_string(),
                payload,
            });
        }
        let _ = state.inbound.send(frame);
    }
    writer.abort();
}

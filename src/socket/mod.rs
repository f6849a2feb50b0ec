//! Phoenix-protocol WebSocket transport: one writer task owns the sink, all
//! outbound frames go through a bounded queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitStream, StreamExt};
use futures::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::{RelayError, RelayResult};
use crate::models::event::{PhoenixMessage, RelayEvent};

/// Serializer version negotiated in the socket URL.
pub const PROTOCOL_VSN: &str = "2.0.0";

const OUTBOUND_QUEUE: usize = 64;
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// `<server_url>/websocket?vsn=2.0.0`
pub fn endpoint_url(server_url: &str) -> String {
    format!(
        "{}/websocket?vsn={}",
        server_url.trim_end_matches('/'),
        PROTOCOL_VSN
    )
}

enum Outgoing {
    Frame(String),
    Close,
}

/// An open socket: a cloneable sender, the inbound frame reader, and the writer task.
pub struct PhoenixSocket {
    pub sender: SocketSender,
    pub reader: FrameReader,
    writer: JoinHandle<()>,
}

impl PhoenixSocket {
    pub async fn connect(server_url: &str) -> RelayResult<Self> {
        let url = endpoint_url(server_url);
        let (ws, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        debug!(url = %url, "socket connected");
        let (mut sink, stream) = ws.split();

        let (tx, mut rx) = mpsc::channel::<Outgoing>(OUTBOUND_QUEUE);
        let writer = tokio::spawn(async move {
            while let Some(out) = rx.recv().await {
                match out {
                    Outgoing::Frame(text) => {
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            debug!(error = %e, "socket write failed");
                            break;
                        }
                    }
                    Outgoing::Close => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            let _ = sink.close().await;
        });

        Ok(Self {
            sender: SocketSender {
                tx,
                refs: Arc::new(AtomicU64::new(0)),
            },
            reader: FrameReader { stream },
            writer,
        })
    }

    /// Send a close frame and wait briefly for the writer to flush.
    pub async fn shutdown(self) {
        self.sender.close();
        let mut writer = self.writer;
        if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
            .await
            .is_err()
        {
            writer.abort();
        }
    }
}

/// Cloneable handle for writing frames; safe to use from many tasks at once.
#[derive(Clone)]
pub struct SocketSender {
    tx: mpsc::Sender<Outgoing>,
    refs: Arc<AtomicU64>,
}

impl SocketSender {
    /// Fresh message ref, monotonically increasing per socket.
    pub fn next_ref(&self) -> String {
        (self.refs.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }

    /// Queue a frame. Waits while the queue is full; fails once the writer is gone.
    pub async fn send(&self, msg: &PhoenixMessage) -> RelayResult<()> {
        let text = serde_json::to_string(msg)?;
        self.tx
            .send(Outgoing::Frame(text))
            .await
            .map_err(|_| RelayError::SocketClosed)
    }

    fn close(&self) {
        let _ = self.tx.try_send(Outgoing::Close);
    }
}

/// Inbound side of the socket, yielding decoded frames.
pub struct FrameReader {
    stream: SplitStream<WsStream>,
}

impl FrameReader {
    /// Next frame; `None` once the server closed the socket. Undecodable frames are skipped.
    pub async fn next(&mut self) -> Option<RelayResult<PhoenixMessage>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => match serde_json::from_str::<PhoenixMessage>(&text) {
                    Ok(msg) => return Some(Ok(msg)),
                    Err(e) => warn!(error = %e, "skipping undecodable frame"),
                },
                Ok(Message::Close(_)) => return None,
                Ok(_) => {}
                Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed) => return None,
                Err(e) => return Some(Err(RelayError::SocketError(e.to_string()))),
            }
        }
    }
}

/// Publishes relay events on one joined topic.
#[derive(Clone)]
pub struct ChannelPublisher {
    sender: SocketSender,
    topic: Arc<str>,
    join_ref: Arc<str>,
}

impl ChannelPublisher {
    pub fn new(sender: SocketSender, topic: &str, join_ref: &str) -> Self {
        Self {
            sender,
            topic: Arc::from(topic),
            join_ref: Arc::from(join_ref),
        }
    }

    pub async fn publish(&self, event: &RelayEvent) -> RelayResult<()> {
        let msg = PhoenixMessage {
            join_ref: Some(self.join_ref.to_string()),
            msg_ref: Some(self.sender.next_ref()),
            topic: self.topic.to_string(),
            event: event.event_name().to_string(),
            payload: serde_json::to_value(event)?,
        };
        self.sender.send(&msg).await
    }
}

//! Wire frames exchanged with the platform socket and the relay events published on it.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::channel::{
    HEARTBEAT_EVENT, PHOENIX_TOPIC, PHX_JOIN, TOPIC_CHUNK, TOPIC_CHUNK_END, TOPIC_CHUNK_START,
    TOPIC_ERROR, TOPIC_RESULT,
};

/// One socket frame: `[join_ref, ref, topic, event, payload]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawFrame", into = "RawFrame")]
pub struct PhoenixMessage {
    pub join_ref: Option<String>,
    pub msg_ref: Option<String>,
    pub topic: String,
    pub event: String,
    pub payload: serde_json::Value,
}

#[derive(Serialize, Deserialize)]
struct RawFrame(
    Option<String>,
    Option<String>,
    String,
    String,
    serde_json::Value,
);

impl From<RawFrame> for PhoenixMessage {
    fn from(RawFrame(join_ref, msg_ref, topic, event, payload): RawFrame) -> Self {
        Self {
            join_ref,
            msg_ref,
            topic,
            event,
            payload,
        }
    }
}

impl From<PhoenixMessage> for RawFrame {
    fn from(m: PhoenixMessage) -> Self {
        RawFrame(m.join_ref, m.msg_ref, m.topic, m.event, m.payload)
    }
}

impl PhoenixMessage {
    pub fn join(topic: &str, join_ref: &str, payload: &JoinPayload) -> Self {
        Self {
            join_ref: Some(join_ref.to_string()),
            msg_ref: Some(join_ref.to_string()),
            topic: topic.to_string(),
            event: PHX_JOIN.to_string(),
            payload: json!(payload),
        }
    }

    pub fn heartbeat(msg_ref: &str) -> Self {
        Self {
            join_ref: None,
            msg_ref: Some(msg_ref.to_string()),
            topic: PHOENIX_TOPIC.to_string(),
            event: HEARTBEAT_EVENT.to_string(),
            payload: json!({}),
        }
    }

    pub fn is_reply_to(&self, msg_ref: &str) -> bool {
        self.event == super::channel::PHX_REPLY && self.msg_ref.as_deref() == Some(msg_ref)
    }

    /// Interpret the payload of a `phx_reply` frame.
    pub fn reply(&self) -> ReplyStatus {
        let status = self.payload.get("status").and_then(|s| s.as_str());
        match status {
            Some("ok") => ReplyStatus::Ok,
            _ => {
                let reason = self
                    .payload
                    .get("response")
                    .and_then(|r| r.get("reason"))
                    .and_then(|r| r.as_str())
                    .or(status)
                    .unwrap_or("unknown")
                    .to_string();
                ReplyStatus::Error { reason }
            }
        }
    }
}

/// Outcome carried by a `phx_reply`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyStatus {
    Ok,
    Error { reason: String },
}

/// Join handshake payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinPayload {
    pub model: String,
    pub key: String,
    pub salt: String,
}

/// Outbound event for one job. `Result`, `ChunkEnd` and `Error` are terminal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RelayEvent {
    Result {
        id: String,
        result: serde_json::Value,
    },
    ChunkStart {
        id: String,
    },
    Chunk {
        id: String,
        chunk: String,
    },
    ChunkEnd {
        id: String,
    },
    Error {
        id: String,
        error: String,
    },
}

impl RelayEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            RelayEvent::Result { .. } => TOPIC_RESULT,
            RelayEvent::ChunkStart { .. } => TOPIC_CHUNK_START,
            RelayEvent::Chunk { .. } => TOPIC_CHUNK,
            RelayEvent::ChunkEnd { .. } => TOPIC_CHUNK_END,
            RelayEvent::Error { .. } => TOPIC_ERROR,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            RelayEvent::Result { id, .. }
            | RelayEvent::ChunkStart { id }
            | RelayEvent::Chunk { id, .. }
            | RelayEvent::ChunkEnd { id }
            | RelayEvent::Error { id, .. } => id,
        }
    }

    pub fn error(id: impl Into<String>, error: impl ToString) -> Self {
        RelayEvent::Error {
            id: id.into(),
            error: error.to_string(),
        }
    }
}

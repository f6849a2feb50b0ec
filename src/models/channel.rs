//! Channel topics and event naming conventions.

use std::fmt;

/// Topic prefix shared with the platform; the full topic is `worker:<derived id>`.
pub const CHANNEL_NAME: &str = "worker";

/// Inbound job requests.
pub const TOPIC_REQUEST: &str = "request";
/// Non-streamed completion result (terminal).
pub const TOPIC_RESULT: &str = "result";
/// Stream start marker.
pub const TOPIC_CHUNK_START: &str = "chunk_start";
/// One streamed chunk.
pub const TOPIC_CHUNK: &str = "chunk";
/// Stream end marker (terminal).
pub const TOPIC_CHUNK_END: &str = "chunk_end";
/// Per-request failure (terminal).
pub const TOPIC_ERROR: &str = "error";

/// Phoenix control events.
pub const PHX_JOIN: &str = "phx_join";
pub const PHX_REPLY: &str = "phx_reply";
pub const PHX_ERROR: &str = "phx_error";
pub const PHX_CLOSE: &str = "phx_close";
pub const PHOENIX_TOPIC: &str = "phoenix";
pub const HEARTBEAT_EVENT: &str = "heartbeat";

/// Rendezvous address for one worker identity: `<CHANNEL_NAME>:<derived id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelTopic(String);

impl ChannelTopic {
    pub fn for_worker_id(derived_id: &str) -> Self {
        Self(format!("{}:{}", CHANNEL_NAME, derived_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

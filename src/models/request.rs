//! Job request payloads received on the worker channel.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// One job: a caller-assigned id plus the completion parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct JobRequest {
    #[validate(length(min = 1, message = "id must not be empty"))]
    pub id: String,
    #[validate(nested)]
    pub params: CompletionParams,
}

/// Parameters forwarded to the backend's chat completion endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct CompletionParams {
    #[validate(length(min = 1, message = "model must not be empty"))]
    pub model: String,
    #[validate(nested)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub temperature: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ChatMessage {
    #[validate(length(min = 1, message = "role must not be empty"))]
    pub role: String,
    #[validate(length(min = 1, message = "content must not be empty"))]
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

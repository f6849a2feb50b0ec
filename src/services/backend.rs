//! Local inference backend client: capability probe and chat completions.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RelayError, RelayResult};
use crate::models::request::CompletionParams;

/// Lazily produced text chunks of a streamed completion. Finite, not restartable.
pub type ChunkStream = BoxStream<'static, RelayResult<String>>;

/// Backend seam used by the channel session.
///
/// Cancellation is the caller's job: dropping any returned future or stream
/// tears the underlying HTTP request down.
#[async_trait]
pub trait InferenceBackend: Send + Sync + 'static {
    /// Whether `model_name` is among the models the backend reports.
    async fn probe_model(&self, model_name: &str) -> RelayResult<bool>;

    /// Blocking completion; returns the backend's JSON payload.
    async fn complete(&self, params: &CompletionParams) -> RelayResult<serde_json::Value>;

    /// Streamed completion; the response headers have been checked before this returns.
    async fn complete_stream(&self, params: &CompletionParams) -> RelayResult<ChunkStream>;
}

/// A model as listed by `GET /api/tags`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelTag {
    pub name: String,
    #[serde(default)]
    pub size: u64,
}

impl ModelTag {
    /// Size in gigabytes, rounded to one decimal.
    pub fn size_gb(&self) -> f64 {
        (self.size as f64 / 1e9 * 10.0).round() / 10.0
    }
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Option<Vec<ModelTag>>,
}

/// HTTP client for an Ollama-compatible server.
#[derive(Clone)]
pub struct OllamaBackend {
    http: reqwest::Client,
    base_url: String,
}

impl OllamaBackend {
    pub fn new(base_url: &str) -> RelayResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self::with_client(http, base_url))
    }

    pub fn with_client(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Models currently available on the backend. `None` when the backend
    /// answered without a `models` list.
    pub async fn list_models(&self) -> RelayResult<Option<Vec<ModelTag>>> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| RelayError::BackendUnreachable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(RelayError::BackendUnreachable(format!(
                "Failed to fetch tags from LLM (status {})",
                resp.status().as_u16()
            )));
        }
        let tags: TagsResponse = resp
            .json()
            .await
            .map_err(|e| RelayError::BackendUnreachable(e.to_string()))?;
        Ok(tags.models)
    }

    /// Reachability check: the tags endpoint answers with success.
    pub async fn heartbeat(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.http.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn post_completion(&self, params: &CompletionParams) -> RelayResult<reqwest::Response> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(params)
            .send()
            .await
            .map_err(|e| RelayError::BackendUnreachable(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            debug!(status = status.as_u16(), model = %params.model, "completion rejected");
            return Err(RelayError::BackendError {
                status: status.as_u16(),
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl InferenceBackend for OllamaBackend {
    async fn probe_model(&self, model_name: &str) -> RelayResult<bool> {
        let models = self.list_models().await?;
        Ok(models
            .unwrap_or_default()
            .iter()
            .any(|m| m.name == model_name))
    }

    async fn complete(&self, params: &CompletionParams) -> RelayResult<serde_json::Value> {
        let resp = self.post_completion(params).await?;
        Ok(resp.json::<serde_json::Value>().await?)
    }

    async fn complete_stream(&self, params: &CompletionParams) -> RelayResult<ChunkStream> {
        let resp = self.post_completion(params).await?;
        Ok(decode_text_stream(resp.bytes_stream()))
    }
}

/// Turn a byte stream into text chunks without splitting multi-byte characters.
pub fn decode_text_stream<S, B, E>(body: S) -> ChunkStream
where
    S: futures::Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<RelayError> + Send + 'static,
{
    let state = Some((Box::pin(body), Utf8ChunkDecoder::default()));
    futures::stream::unfold(state, |state| async move {
        let (mut body, mut decoder) = state?;
        loop {
            match body.next().await {
                Some(Ok(bytes)) => {
                    let text = decoder.push(bytes.as_ref());
                    if !text.is_empty() {
                        return Some((Ok(text), Some((body, decoder))));
                    }
                }
                Some(Err(e)) => return Some((Err(e.into()), None)),
                None => {
                    let rest = decoder.finish();
                    return (!rest.is_empty()).then(|| (Ok(rest), None));
                }
            }
        }
    })
    .boxed()
}

/// Incremental UTF-8 decoder: holds back an incomplete trailing sequence until
/// the next push; invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        let mut rest: &[u8] = &self.pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }
        let keep = rest.to_vec();
        self.pending = keep;
        out
    }

    /// Flush whatever is left, lossily.
    pub fn finish(&mut self) -> String {
        let out = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        out
    }
}

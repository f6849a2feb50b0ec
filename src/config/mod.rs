//! Worker configuration loaded from environment.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use serde::Serialize;

use crate::services::identity::{generate_salt, DEFAULT_SALT_LENGTH};

const DEFAULT_URL_SERVER: &str = "wss://platform.replicantzk.com";
const DEFAULT_URL_LLM: &str = "http://localhost:11434";
const DEFAULT_JOIN_TIMEOUT_SECS: u64 = 10;
const DEFAULT_HEARTBEAT_SECS: u64 = 30;

/// Everything one channel session needs. Immutable for the session's lifetime;
/// changing any field means starting a new session.
#[derive(Clone)]
pub struct SessionConfig {
    pub model_name: String,
    pub api_key: String,
    pub salt: String,
    /// Platform socket endpoint (e.g. `wss://platform.example.com`).
    pub server_url: String,
    /// Local inference server (e.g. `http://localhost:11434`).
    pub llm_url: String,
}

/// Configuration echo with the secrets removed.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RedactedConfig {
    pub model_name: String,
    pub server_url: String,
    pub llm_url: String,
}

impl SessionConfig {
    pub fn redacted(&self) -> RedactedConfig {
        RedactedConfig {
            model_name: self.model_name.clone(),
            server_url: self.server_url.clone(),
            llm_url: self.llm_url.clone(),
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("model_name", &self.model_name)
            .field("api_key", &"<redacted>")
            .field("salt", &"<redacted>")
            .field("server_url", &self.server_url)
            .field("llm_url", &self.llm_url)
            .finish()
    }
}

/// Protocol timings for the channel session.
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// How long to wait for the join reply before giving up with `timeout`.
    pub join_timeout: Duration,
    /// Interval between socket heartbeats.
    pub heartbeat_interval: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            join_timeout: Duration::from_secs(DEFAULT_JOIN_TIMEOUT_SECS),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
        }
    }
}

impl SessionOptions {
    /// Zero durations fall back to the defaults; a zero heartbeat period is not a valid interval.
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        Self {
            join_timeout: if self.join_timeout.is_zero() {
                defaults.join_timeout
            } else {
                self.join_timeout
            },
            heartbeat_interval: if self.heartbeat_interval.is_zero() {
                defaults.heartbeat_interval
            } else {
                self.heartbeat_interval
            },
        }
    }
}

/// Worker configuration loaded from `.env`, environment variables and CLI flags.
#[derive(Debug, Clone)]
pub struct Config {
    pub session: SessionConfig,
    pub options: SessionOptions,
    /// Bind address for the local status surface; disabled when unset.
    pub status_addr: Option<SocketAddr>,
    /// Log level: `error`, `warn`, `info`, `debug`, `trace`.
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment. Call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigLoadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let model_name = var("WORKER_MODEL").ok_or(ConfigLoadError::Missing("WORKER_MODEL"))?;
        let api_key = var("WORKER_API_KEY").ok_or(ConfigLoadError::Missing("WORKER_API_KEY"))?;
        let salt = match var("WORKER_SALT") {
            Some(salt) => salt,
            None => generate_salt(DEFAULT_SALT_LENGTH)
                .map_err(|_| ConfigLoadError::Invalid("WORKER_SALT"))?,
        };
        let server_url = var("WORKER_URL_SERVER").unwrap_or_else(|| DEFAULT_URL_SERVER.to_string());
        let llm_url = var("WORKER_URL_LLM").unwrap_or_else(|| DEFAULT_URL_LLM.to_string());

        let status_addr = var("STATUS_ADDR")
            .map(|addr| addr.parse::<SocketAddr>())
            .transpose()
            .map_err(|_| ConfigLoadError::Invalid("STATUS_ADDR"))?;

        let join_timeout = parse_secs(var("WORKER_JOIN_TIMEOUT_SECS"), DEFAULT_JOIN_TIMEOUT_SECS)
            .ok_or(ConfigLoadError::Invalid("WORKER_JOIN_TIMEOUT_SECS"))?;
        let heartbeat_interval = parse_secs(var("WORKER_HEARTBEAT_SECS"), DEFAULT_HEARTBEAT_SECS)
            .ok_or(ConfigLoadError::Invalid("WORKER_HEARTBEAT_SECS"))?;

        let log_level = var("LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            session: SessionConfig {
                model_name,
                api_key,
                salt,
                server_url: server_url.trim_end_matches('/').to_string(),
                llm_url: llm_url.trim_end_matches('/').to_string(),
            },
            options: SessionOptions {
                join_timeout,
                heartbeat_interval,
            },
            status_addr,
            log_level,
        })
    }
}

fn parse_secs(raw: Option<String>, default: u64) -> Option<Duration> {
    match raw {
        None => Some(Duration::from_secs(default)),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Missing required setting {0}")]
    Missing(&'static str),
    #[error("Invalid {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_applied() {
        let config = Config::from_lookup(lookup_from(&[
            ("WORKER_MODEL", "llama3"),
            ("WORKER_API_KEY", "key"),
        ]))
        .unwrap();
        assert_eq!(config.session.server_url, DEFAULT_URL_SERVER);
        assert_eq!(config.session.llm_url, DEFAULT_URL_LLM);
        assert_eq!(config.session.salt.len(), DEFAULT_SALT_LENGTH);
        assert_eq!(config.options.join_timeout, Duration::from_secs(10));
        assert_eq!(config.options.heartbeat_interval, Duration::from_secs(30));
        assert!(config.status_addr.is_none());
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn missing_api_key_rejected() {
        let err = Config::from_lookup(lookup_from(&[("WORKER_MODEL", "llama3")])).unwrap_err();
        assert!(matches!(err, ConfigLoadError::Missing("WORKER_API_KEY")));
    }

    #[test]
    fn invalid_status_addr_rejected() {
        let err = Config::from_lookup(lookup_from(&[
            ("WORKER_MODEL", "llama3"),
            ("WORKER_API_KEY", "key"),
            ("STATUS_ADDR", "not-an-addr"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigLoadError::Invalid("STATUS_ADDR")));
    }

    #[test]
    fn zero_timeout_rejected() {
        let err = Config::from_lookup(lookup_from(&[
            ("WORKER_MODEL", "llama3"),
            ("WORKER_API_KEY", "key"),
            ("WORKER_JOIN_TIMEOUT_SECS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigLoadError::Invalid("WORKER_JOIN_TIMEOUT_SECS")));
    }

    #[test]
    fn trailing_slashes_trimmed() {
        let config = Config::from_lookup(lookup_from(&[
            ("WORKER_MODEL", "llama3"),
            ("WORKER_API_KEY", "key"),
            ("WORKER_URL_LLM", "http://127.0.0.1:11434/"),
        ]))
        .unwrap();
        assert_eq!(config.session.llm_url, "http://127.0.0.1:11434");
    }

    #[test]
    fn secrets_never_echoed() {
        let config = Config::from_lookup(lookup_from(&[
            ("WORKER_MODEL", "llama3"),
            ("WORKER_API_KEY", "super-secret-key"),
            ("WORKER_SALT", "pepper"),
        ]))
        .unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("super-secret-key"));
        assert!(!debug.contains("pepper"));
        let echo = serde_json::to_string(&config.session.redacted()).unwrap();
        assert!(!echo.contains("super-secret-key"));
        assert!(!echo.contains("pepper"));
        assert!(echo.contains("\"modelName\":\"llama3\""));
    }

    #[test]
    fn zero_durations_fall_back_to_defaults() {
        let options = SessionOptions {
            join_timeout: Duration::ZERO,
            heartbeat_interval: Duration::ZERO,
        }
        .sanitized();
        assert_eq!(options.join_timeout, Duration::from_secs(DEFAULT_JOIN_TIMEOUT_SECS));
        assert_eq!(options.heartbeat_interval, Duration::from_secs(DEFAULT_HEARTBEAT_SECS));

        let custom = SessionOptions {
            join_timeout: Duration::from_millis(200),
            heartbeat_interval: Duration::from_millis(50),
        };
        let kept = custom.sanitized();
        assert_eq!(kept.join_timeout, custom.join_timeout);
        assert_eq!(kept.heartbeat_interval, custom.heartbeat_interval);
    }
}

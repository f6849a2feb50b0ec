//! Worker identity: SHA-256 over `api_key || salt`, hex encoded.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{RelayError, RelayResult};
use crate::models::channel::ChannelTopic;

/// Longest salt `generate_salt` can produce (one hex-encoded SHA-256 digest, halved).
pub const MAX_SALT_LENGTH: usize = 32;
pub const DEFAULT_SALT_LENGTH: usize = 16;

/// Hex string taken from the SHA-256 of fresh random bytes, truncated to `length`.
pub fn generate_salt(length: usize) -> RelayResult<String> {
    if length > MAX_SALT_LENGTH {
        return Err(RelayError::InvalidArgument(format!(
            "Salt length must be less than or equal to {}",
            MAX_SALT_LENGTH
        )));
    }
    let mut hasher = Sha256::new();
    hasher.update(Uuid::new_v4().as_bytes());
    hasher.update(Uuid::new_v4().as_bytes());
    let mut salt = hex::encode(hasher.finalize());
    salt.truncate(length);
    Ok(salt)
}

/// `hex(sha256(api_key + salt))`. Both ends of the channel compute this independently.
pub fn derive_worker_id(api_key: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}

/// Id derived from an API key and salt. The secrets themselves are not kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerIdentity {
    derived_id: String,
}

impl WorkerIdentity {
    pub fn new(api_key: &str, salt: &str) -> Self {
        Self {
            derived_id: derive_worker_id(api_key, salt),
        }
    }

    pub fn derived_id(&self) -> &str {
        &self.derived_id
    }

    /// `worker:<derived id>`
    pub fn topic(&self) -> ChannelTopic {
        ChannelTopic::for_worker_id(&self.derived_id)
    }
}

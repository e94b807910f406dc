//! Result cache for model invocations.
//!
//! Entries are keyed by model and a content hash of the normalized input and
//! expire purely by time. The cache is an optimization: callers treat every
//! failure as a miss.

mod memory;

pub use memory::MemoryCache;

use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Errors from a cache backend.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),
}

/// Key-value store with per-entry expiry.
///
/// Implementations own their synchronization and are shared across executors
/// and workers.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch an unexpired value.
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, CacheError>;

    /// Store a value that expires after `ttl`.
    async fn set(&self, key: &str, value: serde_json::Value, ttl: Duration) -> Result<(), CacheError>;
}

/// Cache that never stores anything, used when caching is disabled.
pub struct NoCache;

#[async_trait]
impl CacheStore for NoCache {
    async fn get(&self, _key: &str) -> Result<Option<serde_json::Value>, CacheError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: serde_json::Value, _ttl: Duration) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Derive the cache key for a `(model, input)` pair.
///
/// The input is normalized to canonical JSON (object keys sorted, no
/// whitespace) before hashing, so semantically equal payloads share a key.
pub fn cache_key(model: &str, input: &serde_json::Value) -> String {
    let normalized = normalize(input);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("inference:{}:{}", model, hex::encode(hasher.finalize()))
}

/// Canonical JSON text of a value.
fn normalize(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let body: Vec<String> = entries
                .into_iter()
                .map(|(k, v)| format!("{}:{}", serde_json::Value::String(k.clone()), normalize(v)))
                .collect();
            format!("{{{}}}", body.join(","))
        }
        serde_json::Value::Array(items) => {
            let body: Vec<String> = items.iter().map(normalize).collect();
            format!("[{}]", body.join(","))
        }
        other => other.to_string(),
    }
}

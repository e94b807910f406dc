//! Shared fixtures for unit and integration tests.

pub mod mock_backend;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use inference_common::{names, LatencyClass, ModeRateLimits, ModelLimits, ModelSpec};
use serde_json::json;

use crate::cache::{CacheError, CacheStore};
use crate::config::Config;
use crate::error::ModelError;
use crate::models::{ModelInvoker, ModelRegistry};
use crate::{Gateway, GatewayError};

/// Catalog entry with generous limits.
pub fn spec(name: &str) -> ModelSpec {
    ModelSpec {
        name: name.to_string(),
        description: format!("Test model {}", name),
        input_schema: json!({"type": "object"}),
        output_schema: json!({"type": "object"}),
        latency_class: LatencyClass::Fast,
        limits: ModelLimits {
            max_input_bytes: 1024 * 1024,
            timeout_secs: 30,
            max_concurrency: 4,
            rate_limit: ModeRateLimits {
                realtime_per_minute: 1000,
                stream_per_minute: 1000,
                batch_per_hour: 1000,
            },
        },
    }
}

/// Returns `{"model": <name>, "echo": <input>}`.
pub struct EchoModel;

#[async_trait]
impl ModelInvoker for EchoModel {
    async fn invoke(&self, model: &str, input: &serde_json::Value) -> Result<serde_json::Value, ModelError> {
        Ok(json!({"model": model, "echo": input}))
    }
}

/// Echo model that counts its invocations.
#[derive(Default)]
pub struct CountingModel {
    pub calls: AtomicUsize,
}

#[async_trait]
impl ModelInvoker for CountingModel {
    async fn invoke(&self, model: &str, input: &serde_json::Value) -> Result<serde_json::Value, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        EchoModel.invoke(model, input).await
    }
}

/// Echo model that takes `delay` per call and tracks peak concurrency.
pub struct SlowModel {
    delay: Duration,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_concurrent: AtomicUsize,
}

impl SlowModel {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ModelInvoker for SlowModel {
    async fn invoke(&self, model: &str, input: &serde_json::Value) -> Result<serde_json::Value, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        EchoModel.invoke(model, input).await
    }
}

/// Fails the first `n` calls, then echoes.
pub struct FlakyModel {
    failures: usize,
    pub calls: AtomicUsize,
}

impl FlakyModel {
    pub fn failing_first(n: usize) -> Self {
        Self {
            failures: n,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ModelInvoker for FlakyModel {
    async fn invoke(&self, model: &str, input: &serde_json::Value) -> Result<serde_json::Value, ModelError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            return Err(ModelError::Backend(format!("flaky failure on call {}", call)));
        }
        EchoModel.invoke(model, input).await
    }
}

/// Fails inputs carrying `"fail": true`, echoes everything else.
pub struct FailOnFlagModel;

#[async_trait]
impl ModelInvoker for FailOnFlagModel {
    async fn invoke(&self, model: &str, input: &serde_json::Value) -> Result<serde_json::Value, ModelError> {
        if input.get("fail").and_then(|v| v.as_bool()) == Some(true) {
            return Err(ModelError::Backend("input rejected by model".to_string()));
        }
        EchoModel.invoke(model, input).await
    }
}

/// Cache whose every operation fails.
pub struct FailingCache;

#[async_trait]
impl CacheStore for FailingCache {
    async fn get(&self, _key: &str) -> Result<Option<serde_json::Value>, CacheError> {
        Err(CacheError::Unavailable("cache offline".to_string()))
    }

    async fn set(&self, _key: &str, _value: serde_json::Value, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("cache offline".to_string()))
    }
}

/// Configuration suited to tests: in-memory store, fast polling.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.logging.level = "debug".to_string();
    config.batch.database_url = "sqlite::memory:".to_string();
    config.queue.poll_interval_ms = 10;
    config.queue.base_delay_ms = 10;
    config.queue.max_delay_ms = 50;
    config
}

/// Registry with every built-in model backed by `invoker`.
pub fn test_registry(invoker: Arc<dyn ModelInvoker>) -> ModelRegistry {
    let mut registry = ModelRegistry::new();
    for name in names::BUILTIN {
        registry.register(spec(name), invoker.clone());
    }
    registry
}

/// Gateway over [`test_config`] whose built-in models fail on `"fail": true`.
pub async fn create_test_gateway() -> Result<Gateway, GatewayError> {
    Gateway::with_registry(test_config(), test_registry(Arc::new(FailOnFlagModel))).await
}

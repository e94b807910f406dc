//! Real-time executor.
//!
//! Serves single requests inline with the caller, consulting the result cache
//! before invoking a model. The same execution path is used per item by the
//! batch worker and the streaming executor so all modes share one cache.

use std::sync::Arc;
use std::time::{Duration, Instant};

use inference_common::{InferenceOptions, InferenceResult};

use super::metrics::{DeliveryMode, Metrics, Outcome};
use crate::cache::{cache_key, CacheStore};
use crate::error::{GatewayError, ModelError, Result};
use crate::models::ModelRegistry;

/// Executes model calls through the shared cache.
pub struct RealTimeExecutor {
    registry: Arc<ModelRegistry>,
    cache: Arc<dyn CacheStore>,
    metrics: Arc<Metrics>,
    default_ttl: Duration,
    realtime_timeout: Duration,
}

impl RealTimeExecutor {
    pub fn new(
        registry: Arc<ModelRegistry>,
        cache: Arc<dyn CacheStore>,
        metrics: Arc<Metrics>,
        default_ttl: Duration,
        realtime_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            cache,
            metrics,
            default_ttl,
            realtime_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Serve one synchronous request.
    ///
    /// Yields exactly one result or one error; model failures are surfaced as
    /// `ModelInvocation` and are never cached.
    pub async fn execute(
        &self,
        model: &str,
        input: &serde_json::Value,
        options: &InferenceOptions,
    ) -> Result<InferenceResult> {
        self.registry.get(model)?;

        let started = Instant::now();
        match tokio::time::timeout(
            self.realtime_timeout,
            self.run(model, input, options.skip_cache, DeliveryMode::Realtime),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                self.metrics
                    .record(model, DeliveryMode::Realtime, Outcome::Failure, started.elapsed());
                Err(ModelError::Timeout(self.realtime_timeout.as_secs()).into())
            }
        }
    }

    /// Execute one input: cache lookup, then model invocation and cache fill.
    pub async fn run(
        &self,
        model: &str,
        input: &serde_json::Value,
        skip_cache: bool,
        mode: DeliveryMode,
    ) -> Result<InferenceResult> {
        let registered = self.registry.get(model)?;
        let key = cache_key(model, input);

        if !skip_cache {
            if let Some(output) = self.lookup(&key).await {
                tracing::debug!(model, mode = mode.as_str(), "Cache hit");
                self.metrics.record(model, mode, Outcome::CacheHit, Duration::ZERO);
                return Ok(InferenceResult::success(model, output, 0, true));
            }
        }

        let started = Instant::now();
        let result = self.registry.invoke(model, input).await;
        let latency = started.elapsed();

        match result {
            Ok(output) => {
                self.metrics.record(model, mode, Outcome::Success, latency);
                let ttl = registered.cache_ttl().unwrap_or(self.default_ttl);
                self.store(&key, output.clone(), ttl).await;
                Ok(InferenceResult::success(model, output, latency.as_millis() as u64, false))
            }
            Err(err) => {
                self.metrics.record(model, mode, Outcome::Failure, latency);
                tracing::info!(model, mode = mode.as_str(), "Model invocation failed: {}", err);
                Err(err)
            }
        }
    }

    /// Execute one input, folding a model failure into an error result.
    ///
    /// Used where per-item failures must not abort the surrounding work.
    /// Errors other than model failures still propagate.
    pub async fn run_item(
        &self,
        model: &str,
        input: &serde_json::Value,
        skip_cache: bool,
        mode: DeliveryMode,
    ) -> Result<InferenceResult> {
        let started = Instant::now();
        match self.run(model, input, skip_cache, mode).await {
            Ok(result) => Ok(result),
            Err(GatewayError::ModelInvocation(err)) => Ok(InferenceResult::failure(
                model,
                err.to_string(),
                started.elapsed().as_millis() as u64,
            )),
            Err(err) => Err(err),
        }
    }

    async fn lookup(&self, key: &str) -> Option<serde_json::Value> {
        match self.cache.get(key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Cache lookup failed, treating as miss: {}", e);
                None
            }
        }
    }

    async fn store(&self, key: &str, value: serde_json::Value, ttl: Duration) {
        if let Err(e) = self.cache.set(key, value, ttl).await {
            tracing::warn!("Cache store failed, result not cached: {}", e);
        }
    }
}

//! Model registry mapping model names to invokers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use inference_common::ModelSpec;
use tokio::sync::Semaphore;

use super::{builtin_specs, endpoint_spec, HttpModelInvoker, ModelInvoker};
use crate::config::{ModelsConfig, RateLimitConfig};
use crate::error::{GatewayError, ModelError, Result};

/// A model registered with the gateway.
pub struct RegisteredModel {
    pub spec: ModelSpec,
    invoker: Arc<dyn ModelInvoker>,
    /// Concurrency gate shared by every delivery mode.
    gate: Arc<Semaphore>,
    timeout: Duration,
    cache_ttl: Option<Duration>,
}

impl RegisteredModel {
    /// Cache TTL override for this model, if configured.
    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl
    }

    /// Invocations currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.spec
            .limits
            .max_concurrency
            .max(1)
            .saturating_sub(self.gate.available_permits())
    }
}

/// Registry of all invocable models.
///
/// Populated once at startup and read-only afterwards; adding a model means
/// registering one more entry.
#[derive(Default)]
pub struct ModelRegistry {
    models: HashMap<String, RegisteredModel>,
    /// Registration order, used for the catalog.
    order: Vec<String>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from configuration, backed by HTTP invokers.
    pub fn from_config(models: &ModelsConfig, rate_limit: &RateLimitConfig) -> Self {
        let mut registry = Self::new();
        let shared: Arc<dyn ModelInvoker> = Arc::new(HttpModelInvoker::new(&models.backend_url));

        let invoker_for = |name: &str, fallback: Option<&String>| -> Arc<dyn ModelInvoker> {
            let url = models
                .overrides
                .get(name)
                .and_then(|o| o.backend_url.as_ref())
                .or(fallback);
            match url {
                Some(url) => Arc::new(HttpModelInvoker::new(url)),
                None => shared.clone(),
            }
        };

        for spec in builtin_specs(models, rate_limit) {
            let invoker = invoker_for(&spec.name, None);
            registry.register(spec, invoker);
        }

        let mut endpoint_names: Vec<&String> = models.endpoints.keys().collect();
        endpoint_names.sort();
        for name in endpoint_names {
            let endpoint = &models.endpoints[name];
            let spec = endpoint_spec(name, endpoint, models, rate_limit);
            let invoker = invoker_for(name, endpoint.backend_url.as_ref());
            registry.register(spec, invoker);
        }

        for (name, overrides) in &models.overrides {
            if let Some(ttl) = overrides.cache_ttl_secs {
                registry.set_cache_ttl(name, Duration::from_secs(ttl));
            }
        }

        registry
    }

    /// Register a model. Re-registering a name replaces the previous entry.
    pub fn register(&mut self, spec: ModelSpec, invoker: Arc<dyn ModelInvoker>) -> &mut Self {
        let name = spec.name.clone();
        let model = RegisteredModel {
            gate: Arc::new(Semaphore::new(spec.limits.max_concurrency.max(1))),
            timeout: Duration::from_secs(spec.limits.timeout_secs),
            cache_ttl: None,
            invoker,
            spec,
        };
        if self.models.insert(name.clone(), model).is_none() {
            self.order.push(name.clone());
        }
        tracing::debug!("Registered model {}", name);
        self
    }

    /// Override the cache TTL of a registered model.
    pub fn set_cache_ttl(&mut self, name: &str, ttl: Duration) {
        if let Some(model) = self.models.get_mut(name) {
            model.cache_ttl = Some(ttl);
        }
    }

    /// Look up a model, failing with `InvalidModel` for unknown names.
    pub fn get(&self, name: &str) -> Result<&RegisteredModel> {
        self.models
            .get(name)
            .ok_or_else(|| GatewayError::InvalidModel(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    /// Catalog of registered models, in registration order.
    pub fn catalog(&self) -> Vec<ModelSpec> {
        self.order
            .iter()
            .filter_map(|name| self.models.get(name))
            .map(|m| m.spec.clone())
            .collect()
    }

    /// Rough time to process `count` inputs sequentially.
    pub fn estimate(&self, name: &str, count: usize) -> Result<Duration> {
        let model = self.get(name)?;
        let per_item = model.spec.latency_class.expected_item_ms();
        Ok(Duration::from_millis(per_item.saturating_mul(count as u64)))
    }

    /// Invoke a model, bounded by its concurrency gate and timeout.
    pub async fn invoke(&self, name: &str, input: &serde_json::Value) -> Result<serde_json::Value> {
        let model = self.get(name)?;

        let size = serde_json::to_vec(input)
            .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?
            .len();
        if size > model.spec.limits.max_input_bytes {
            return Err(ModelError::InputTooLarge {
                size,
                max: model.spec.limits.max_input_bytes,
            }
            .into());
        }

        let _permit = model
            .gate
            .acquire()
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()))?;

        match tokio::time::timeout(model.timeout, model.invoker.invoke(name, input)).await {
            Ok(result) => result.map_err(GatewayError::from),
            Err(_) => {
                tracing::warn!(model = name, timeout_secs = model.timeout.as_secs(), "Model invocation timed out");
                Err(ModelError::Timeout(model.timeout.as_secs()).into())
            }
        }
    }
}

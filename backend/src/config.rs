//! Configuration for the inference gateway.

use std::collections::HashMap;

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use inference_common::LatencyClass;
use serde::Deserialize;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Public base path used to build status/result URLs.
    pub public_base_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            public_base_path: "/v1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Fallback filter when RUST_LOG is not set.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Result cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// TTL for cached results when a model has no override.
    pub default_ttl_secs: u64,
    /// How often expired entries are swept out of memory.
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: 300,
            sweep_interval_secs: 60,
        }
    }
}

/// Job queue and worker pool configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of background workers.
    pub workers: usize,
    /// Jobs waiting or running before new submissions are refused.
    pub max_pending: usize,
    /// Attempts per job, including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Idle wake-up interval for workers waiting on delayed retries.
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            max_pending: 1000,
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            poll_interval_ms: 250,
        }
    }
}

/// Batch coordinator configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum inputs per batch.
    pub max_inputs: usize,
    /// How long batch metadata stays queryable.
    pub retention_secs: u64,
    /// SQLite database for batch metadata (`:memory:` for ephemeral).
    pub database_url: String,
    pub sweep_interval_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_inputs: 1000,
            retention_secs: 24 * 60 * 60,
            database_url: "sqlite:./data/batches.db".to_string(),
            sweep_interval_secs: 300,
        }
    }
}

/// Per-model override of the catalog defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ModelOverride {
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
    #[serde(default)]
    pub max_input_bytes: Option<usize>,
    /// Dedicated backend URL for this model.
    #[serde(default)]
    pub backend_url: Option<String>,
}

/// Additional named model-specific endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_latency_class")]
    pub latency_class: LatencyClass,
    /// Backend URL; falls back to `models.backend_url`.
    #[serde(default)]
    pub backend_url: Option<String>,
}

fn default_latency_class() -> LatencyClass {
    LatencyClass::Standard
}

/// Model invocation layer configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Base URL of the model-serving backend.
    pub backend_url: String,
    /// Upper bound for a whole real-time request.
    pub realtime_timeout_secs: u64,
    /// Default concurrent invocations per model.
    pub max_concurrency: usize,
    /// Default input size limit per model.
    pub max_input_bytes: usize,
    pub overrides: HashMap<String, ModelOverride>,
    pub endpoints: HashMap<String, EndpointConfig>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:9000".to_string(),
            realtime_timeout_secs: 30,
            max_concurrency: 4,
            max_input_bytes: 64 * 1024,
            overrides: HashMap::new(),
            endpoints: HashMap::new(),
        }
    }
}

/// Per-caller request quotas for each delivery mode.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub realtime_per_minute: u32,
    pub stream_per_minute: u32,
    pub batch_per_hour: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            realtime_per_minute: 120,
            stream_per_minute: 20,
            batch_per_hour: 30,
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (GATEWAY__SECTION__KEY format)
    /// 2. config.toml file (if present)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("GATEWAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Largest request body accepted by the batch and stream endpoints.
    ///
    /// Sized so a batch at `batch.max_inputs` whose every input sits at the
    /// largest configured `max_input_bytes` still fits.
    pub fn max_request_body_bytes(&self) -> usize {
        const ENVELOPE_BYTES: usize = 64 * 1024;
        const PER_INPUT_BYTES: usize = 16;

        let largest_input = self
            .models
            .overrides
            .values()
            .filter_map(|o| o.max_input_bytes)
            .fold(self.models.max_input_bytes, usize::max);

        self.batch
            .max_inputs
            .saturating_mul(largest_input.saturating_add(PER_INPUT_BYTES))
            .saturating_add(ENVELOPE_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.cache.default_ttl_secs, 300);
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.batch.retention_secs, 86_400);
        assert_eq!(config.models.realtime_timeout_secs, 30);
    }

    #[test]
    fn test_request_body_limit_covers_largest_batch() {
        let mut config = Config::default();
        let default_limit = config.max_request_body_bytes();
        assert!(default_limit >= 1000 * 64 * 1024);

        config.models.overrides.insert(
            "career-prediction".to_string(),
            ModelOverride {
                max_input_bytes: Some(128 * 1024),
                ..Default::default()
            },
        );
        assert!(config.max_request_body_bytes() >= 1000 * 128 * 1024);
        assert!(config.max_request_body_bytes() > default_limit);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let loaded = ConfigLoader::builder()
            .add_source(File::from_str(
                r#"
                [queue]
                workers = 4

                [models.overrides.job-matching]
                timeout_secs = 5

                [models.endpoints.cv-ranker]
                description = "Ranks CVs for a posting"
                latency_class = "slow"
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let config: Config = loaded.try_deserialize().unwrap();

        assert_eq!(config.queue.workers, 4);
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.models.overrides["job-matching"].timeout_secs, Some(5));
        assert_eq!(config.models.endpoints["cv-ranker"].latency_class, LatencyClass::Slow);
        assert_eq!(config.server.host, "0.0.0.0");
    }
}

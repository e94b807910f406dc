pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod models;
pub mod rate_limit;
pub mod routes;
pub mod store;
pub mod test_util;

pub use config::Config;
pub use error::{GatewayError, ModelError};
pub use gateway::{BatchCoordinator, DeliveryMode, Metrics, RealTimeExecutor, StreamingExecutor};
pub use models::{ModelInvoker, ModelRegistry};

use std::sync::Arc;
use std::time::Duration;

use axum::{middleware, Router};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::cache::{CacheStore, MemoryCache, NoCache};
use crate::gateway::{JobQueue, JobWorkerPool, RetryPolicy, BATCH_JOB_TYPE};
use crate::rate_limit::RateLimits;
use crate::store::BatchStore;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub registry: Arc<ModelRegistry>,
    pub metrics: Arc<Metrics>,
    pub realtime: Arc<RealTimeExecutor>,
    pub streaming: Arc<StreamingExecutor>,
    pub batches: Arc<BatchCoordinator>,
    pub queue: Arc<JobQueue>,
    pub rate_limits: Arc<RateLimits>,
}

/// The assembled gateway: shared state plus the background tasks it owns.
pub struct Gateway {
    state: Arc<AppState>,
    workers: JobWorkerPool,
    background: Vec<JoinHandle<()>>,
}

impl Gateway {
    /// Build the gateway from configuration, with HTTP-backed models.
    pub async fn init(config: Config) -> Result<Self, GatewayError> {
        let registry = ModelRegistry::from_config(&config.models, &config.rate_limit);
        Self::with_registry(config, registry).await
    }

    /// Build the gateway around an already populated model registry.
    pub async fn with_registry(config: Config, registry: ModelRegistry) -> Result<Self, GatewayError> {
        let registry = Arc::new(registry);
        let metrics = Arc::new(Metrics::new());

        let memory_cache = config.cache.enabled.then(|| Arc::new(MemoryCache::new()));
        let cache: Arc<dyn CacheStore> = match &memory_cache {
            Some(cache) => cache.clone(),
            None => {
                tracing::info!("Result cache disabled");
                Arc::new(NoCache)
            }
        };

        let store = Arc::new(BatchStore::new(&config.batch.database_url)?);
        store.fail_interrupted()?;

        let realtime = Arc::new(RealTimeExecutor::new(
            registry.clone(),
            cache,
            metrics.clone(),
            Duration::from_secs(config.cache.default_ttl_secs),
            Duration::from_secs(config.models.realtime_timeout_secs),
        ));

        let queue = Arc::new(JobQueue::new(config.queue.max_pending));
        let batches = Arc::new(BatchCoordinator::new(
            realtime.clone(),
            queue.clone(),
            store,
            RetryPolicy::from_config(&config.queue),
            config.batch.max_inputs,
            Duration::from_secs(config.batch.retention_secs),
            &config.server.public_base_path,
        ));
        queue.register_handler(BATCH_JOB_TYPE, batches.job_handler()).await;

        let workers = JobWorkerPool::spawn(
            queue.clone(),
            config.queue.workers,
            Duration::from_millis(config.queue.poll_interval_ms),
        );

        let streaming = Arc::new(StreamingExecutor::new(realtime.clone()));
        let rate_limits = Arc::new(RateLimits::new(&config.rate_limit));

        let mut background = Vec::new();
        if let Some(cache) = memory_cache {
            let interval = Duration::from_secs(config.cache.sweep_interval_secs.max(1));
            background.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    let purged = cache.purge_expired().await;
                    if purged > 0 {
                        let remaining = cache.len().await;
                        tracing::debug!(remaining, "Purged {} expired cache entries", purged);
                    }
                }
            }));
        }

        {
            let batches = batches.clone();
            let rate_limits = rate_limits.clone();
            let interval = Duration::from_secs(config.batch.sweep_interval_secs.max(1));
            background.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    if let Err(e) = batches.purge_expired().await {
                        tracing::warn!("Batch sweep failed: {}", e);
                    }
                    rate_limits.retain_recent();
                }
            }));
        }

        tracing::info!(
            models = registry.catalog().len(),
            workers = config.queue.workers,
            "Gateway initialized"
        );

        let state = Arc::new(AppState {
            config,
            registry,
            metrics,
            realtime,
            streaming,
            batches,
            queue,
            rate_limits,
        });

        Ok(Self {
            state,
            workers,
            background,
        })
    }

    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Stop background sweeps and let workers finish their current job.
    pub async fn shutdown(self) {
        for task in &self.background {
            task.abort();
        }
        self.workers.shutdown().await;
        tracing::info!("Gateway stopped");
    }
}

/// Build the HTTP router over the shared state.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .merge(routes::inference::router(state.clone()))
        .merge(routes::stream::router(state.clone()))
        .merge(routes::batch::router(state.clone()))
        .merge(routes::models::router(state.clone()));

    Router::new()
        .merge(routes::health::router(state.clone()))
        .nest(&state.config.server.public_base_path, api)
        .layer(middleware::from_fn(logging::request_logger))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

//! Inference execution modes.
//!
//! This module provides:
//! - Real-time executor serving single requests through the result cache
//! - Streaming executor emitting one event per input
//! - Batch coordinator backed by the background job queue
//! - Per-model, per-mode metrics

pub mod batch;
pub mod job_queue;
pub mod metrics;
mod realtime;
pub mod retry;
mod stream;

pub use batch::{BatchCoordinator, BatchJobHandler, BatchResults, BATCH_JOB_TYPE};
pub use job_queue::{JobQueue, JobWorkerPool};
pub use metrics::{DeliveryMode, Metrics};
pub use realtime::RealTimeExecutor;
pub use retry::RetryPolicy;
pub use stream::StreamingExecutor;

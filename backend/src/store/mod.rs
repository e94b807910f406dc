//! Persistent batch metadata.

mod sqlite;

pub use sqlite::BatchStore;

use chrono::{DateTime, Utc};
use inference_common::{BatchItemResult, BatchStatus};

use crate::error::GatewayError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Corrupt record for batch {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::DatabaseError(e.to_string())
    }
}

impl From<StoreError> for GatewayError {
    fn from(e: StoreError) -> Self {
        GatewayError::Internal(e.to_string())
    }
}

/// Outcome of a retention sweep.
#[derive(Debug, Default, PartialEq)]
pub struct PurgedBatches {
    pub deleted: usize,
    /// Queue handles of deleted batches that had not finished.
    pub abandoned_jobs: Vec<String>,
}

/// Persisted state of one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRecord {
    pub batch_id: String,
    pub owner_id: String,
    pub model: String,
    pub job_ref: String,
    pub status: BatchStatus,
    pub input_count: usize,
    pub processed_count: usize,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Ordered per-input results, present once completed.
    pub results: Option<Vec<BatchItemResult>>,
    pub processing_time_ms: Option<u64>,
}

impl BatchRecord {
    /// A freshly submitted batch.
    pub fn queued(
        batch_id: &str,
        owner_id: &str,
        model: &str,
        job_ref: &str,
        input_count: usize,
    ) -> Self {
        Self {
            batch_id: batch_id.to_string(),
            owner_id: owner_id.to_string(),
            model: model.to_string(),
            job_ref: job_ref.to_string(),
            status: BatchStatus::Queued,
            input_count,
            processed_count: 0,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
            results: None,
            processing_time_ms: None,
        }
    }
}

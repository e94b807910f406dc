//! Batch submission, status and result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::InferenceOptions;

/// Lifecycle state of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Queued,
    Active,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Completed and failed batches never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Body of a batch submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitBatchRequest {
    pub model: String,
    pub inputs: Vec<serde_json::Value>,
    #[serde(default)]
    pub options: Option<InferenceOptions>,
}

/// Response to an accepted batch submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBatchResponse {
    pub batch_id: String,
    pub job_ref: String,
    pub status: BatchStatus,
    pub input_count: usize,
    pub estimated_time_secs: u64,
    pub status_url: String,
    pub result_url: String,
}

/// Status view of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatusView {
    pub batch_id: String,
    pub status: BatchStatus,
    pub progress: u8,
    pub input_count: usize,
    pub processed_count: usize,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_time_remaining_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of one input of a batch, correlated by index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemResult {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub latency_ms: u64,
    #[serde(default)]
    pub cached: bool,
}

/// Aggregate counts over a batch's results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub average_latency_ms: u64,
}

impl BatchSummary {
    pub fn from_results(results: &[BatchItemResult]) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        let total_latency: u64 = results.iter().map(|r| r.latency_ms).sum();
        let average_latency_ms = if results.is_empty() {
            0
        } else {
            total_latency / results.len() as u64
        };
        Self {
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            average_latency_ms,
        }
    }
}

/// Structured results of a completed batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResultsResponse {
    pub batch_id: String,
    pub results: Vec<BatchItemResult>,
    pub summary: BatchSummary,
    pub processing_time_ms: u64,
    pub completed_at: DateTime<Utc>,
}

/// Export format for batch results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultFormat {
    #[default]
    Json,
    Csv,
}

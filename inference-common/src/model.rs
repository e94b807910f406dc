//! Model catalog types.

use serde::{Deserialize, Serialize};

/// Well-known model names served by the gateway.
pub mod names {
    pub const JOB_MATCHING: &str = "job-matching";
    pub const SKILLS_EXTRACTION: &str = "skills-extraction";
    pub const PERSONALITY_ANALYSIS: &str = "personality-analysis";
    pub const SEMANTIC_SIMILARITY: &str = "semantic-similarity";
    pub const CAREER_PREDICTION: &str = "career-prediction";

    /// All built-in model names, in catalog order.
    pub const BUILTIN: [&str; 5] = [
        JOB_MATCHING,
        SKILLS_EXTRACTION,
        PERSONALITY_ANALYSIS,
        SEMANTIC_SIMILARITY,
        CAREER_PREDICTION,
    ];
}

/// Expected latency class of a model.
///
/// Only used for estimating completion times and picking default timeouts,
/// never for correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyClass {
    Fast,
    Standard,
    Slow,
}

impl LatencyClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Standard => "standard",
            Self::Slow => "slow",
        }
    }

    /// Expected time to process one input, in milliseconds.
    pub fn expected_item_ms(&self) -> u64 {
        match self {
            Self::Fast => 200,
            Self::Standard => 1_000,
            Self::Slow => 5_000,
        }
    }

    /// Default per-invocation timeout, in seconds.
    pub fn default_timeout_secs(&self) -> u64 {
        match self {
            Self::Fast => 10,
            Self::Standard => 30,
            Self::Slow => 120,
        }
    }
}

impl std::fmt::Display for LatencyClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Requests allowed per caller for each delivery mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeRateLimits {
    pub realtime_per_minute: u32,
    pub stream_per_minute: u32,
    pub batch_per_hour: u32,
}

/// Operational limits of a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelLimits {
    /// Largest accepted input, measured as serialized JSON bytes.
    pub max_input_bytes: usize,
    /// Per-invocation timeout.
    pub timeout_secs: u64,
    /// Maximum concurrent invocations across all modes.
    pub max_concurrency: usize,
    pub rate_limit: ModeRateLimits,
}

/// Catalog entry describing one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema of the accepted input (opaque to the gateway).
    pub input_schema: serde_json::Value,
    /// JSON Schema of the produced output (opaque to the gateway).
    pub output_schema: serde_json::Value,
    pub latency_class: LatencyClass,
    pub limits: ModelLimits,
}

/// Response from the model catalog endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub object: String,
    pub data: Vec<ModelSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_class_serialization() {
        let json = serde_json::to_string(&LatencyClass::Standard).unwrap();
        assert_eq!(json, r#""standard""#);
        assert_eq!(format!("{}", LatencyClass::Slow), "slow");
    }

    #[test]
    fn test_builtin_names_are_unique() {
        let mut names = names::BUILTIN.to_vec();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), names::BUILTIN.len());
    }
}

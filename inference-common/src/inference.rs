//! Real-time inference request/response types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-request execution options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceOptions {
    /// Bypass the cache lookup and always invoke the model.
    #[serde(default)]
    pub skip_cache: bool,
}

/// Result of one model invocation, regardless of delivery mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceResult {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub latency_ms: u64,
    pub cached: bool,
}

impl InferenceResult {
    pub fn success(model: impl Into<String>, output: serde_json::Value, latency_ms: u64, cached: bool) -> Self {
        Self {
            model: model.into(),
            output: Some(output),
            error: None,
            latency_ms,
            cached,
        }
    }

    pub fn failure(model: impl Into<String>, error: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            model: model.into(),
            output: None,
            error: Some(error.into()),
            latency_ms,
            cached: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Body of a real-time inference request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub model: String,
    pub input: serde_json::Value,
    #[serde(default)]
    pub options: Option<InferenceOptions>,
}

/// Body of a real-time inference response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceResponse {
    pub result: serde_json::Value,
    pub cached: bool,
    pub latency_ms: u64,
    pub model: String,
    pub timestamp: DateTime<Utc>,
}

/// Extract the caller-supplied identifier of an input, if any.
///
/// Inputs that are JSON objects with a string `id` field carry it through to
/// their per-item results.
pub fn input_id(input: &serde_json::Value) -> Option<String> {
    input.get("id").and_then(|v| v.as_str()).map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_minimal() {
        let json = r#"{"model": "job-matching", "input": {"cv": "rust dev"}}"#;
        let request: InferenceRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.model, "job-matching");
        assert!(request.options.is_none());
    }

    #[test]
    fn test_request_with_skip_cache() {
        let json = r#"{"model": "job-matching", "input": "x", "options": {"skipCache": true}}"#;
        let request: InferenceRequest = serde_json::from_str(json).unwrap();
        assert!(request.options.unwrap().skip_cache);
    }

    #[test]
    fn test_failure_omits_output() {
        let result = InferenceResult::failure("skills-extraction", "boom", 12);
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("output").is_none());
        assert_eq!(json["error"], "boom");
        assert_eq!(json["latencyMs"], 12);
        assert!(!result.is_success());
    }

    #[test]
    fn test_input_id() {
        assert_eq!(input_id(&json!({"id": "cv-7", "text": "a"})), Some("cv-7".to_string()));
        assert_eq!(input_id(&json!({"id": 7})), None);
        assert_eq!(input_id(&json!("plain text")), None);
    }
}

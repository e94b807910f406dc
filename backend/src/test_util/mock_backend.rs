//! Response bodies of a mock model-serving backend.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct MockInvokeResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MockInvokeResponse {
    pub fn output(output: serde_json::Value) -> Self {
        Self {
            output: Some(output),
            error: None,
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            output: None,
            error: Some(message.to_string()),
        }
    }
}

pub fn output_json(output: serde_json::Value) -> serde_json::Value {
    serde_json::to_value(MockInvokeResponse::output(output)).unwrap()
}

pub fn error_json(message: &str) -> serde_json::Value {
    serde_json::to_value(MockInvokeResponse::error(message)).unwrap()
}

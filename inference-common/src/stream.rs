//! Streaming inference messages.
//!
//! A stream is a sequence of `result` and `error` events, one per input and in
//! input order, closed by a single `complete` event.

use serde::{Deserialize, Serialize};

use crate::InferenceResult;

/// Body of a streaming inference request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamRequest {
    pub model: String,
    pub inputs: Vec<serde_json::Value>,
}

/// Events pushed to a streaming client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// One input was processed successfully.
    Result {
        index: usize,
        total: usize,
        progress: u8,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        result: InferenceResult,
    },
    /// One input failed; the stream continues.
    Error {
        index: usize,
        total: usize,
        progress: u8,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        error: String,
    },
    /// All inputs were processed.
    Complete {
        total: usize,
        succeeded: usize,
        failed: usize,
    },
}

impl StreamEvent {
    /// SSE event name for this message.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Result { .. } => "result",
            Self::Error { .. } => "error",
            Self::Complete { .. } => "complete",
        }
    }
}

/// Integer percentage of `done` out of `total`.
pub fn progress_percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) * 100) / total) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(0, 3), 0);
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(3, 3), 100);
        assert_eq!(progress_percent(5, 3), 100);
        assert_eq!(progress_percent(0, 0), 100);
    }

    #[test]
    fn test_error_event_serialization() {
        let event = StreamEvent::Error {
            index: 1,
            total: 3,
            progress: 66,
            id: None,
            error: "timeout".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["index"], 1);
        assert!(json.get("id").is_none());
        assert_eq!(event.event_name(), "error");
    }

    #[test]
    fn test_complete_event() {
        let event = StreamEvent::Complete { total: 2, succeeded: 2, failed: 0 };
        assert_eq!(serde_json::to_value(&event).unwrap()["type"], "complete");
        assert_eq!(event.event_name(), "complete");
    }
}

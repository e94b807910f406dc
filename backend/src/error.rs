//! Error types for the inference gateway.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use inference_common::BatchStatus;
use serde_json::json;

/// Failures of a single model invocation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ModelError {
    #[error("Model invocation timed out after {0}s")]
    Timeout(u64),

    #[error("Model backend error: {0}")]
    Backend(String),

    #[error("Input of {size} bytes exceeds the {max} byte limit")]
    InputTooLarge { size: usize, max: usize },

    #[error("Invalid model response: {0}")]
    InvalidResponse(String),
}

/// Errors surfaced to gateway callers.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Unknown model: {0}")]
    InvalidModel(String),

    #[error("Model invocation failed: {0}")]
    ModelInvocation(#[from] ModelError),

    #[error("Access denied")]
    AccessDenied,

    #[error("Batch is not ready (status: {status})")]
    NotReady { status: BatchStatus },

    #[error("Batch failed: {0}")]
    BatchFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Batch of {count} inputs exceeds the maximum of {max}")]
    BatchTooLarge { count: usize, max: usize },

    #[error("Request body too large: {0}")]
    PayloadTooLarge(String),

    #[error("Job queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Rate limit exceeded for {0} requests")]
    RateLimited(&'static str),

    #[error("Missing caller identity")]
    Unauthenticated,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidModel(_) => "invalid_model",
            Self::ModelInvocation(_) => "model_invocation_failed",
            Self::AccessDenied => "access_denied",
            Self::NotReady { .. } => "not_ready",
            Self::BatchFailed(_) => "batch_failed",
            Self::NotFound(_) => "not_found",
            Self::BatchTooLarge { .. } => "batch_too_large",
            Self::PayloadTooLarge(_) => "payload_too_large",
            Self::QueueUnavailable(_) => "queue_unavailable",
            Self::InvalidRequest(_) => "invalid_request",
            Self::RateLimited(_) => "rate_limited",
            Self::Unauthenticated => "unauthenticated",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidModel(_) | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::ModelInvocation(_) => StatusCode::BAD_GATEWAY,
            Self::AccessDenied => StatusCode::FORBIDDEN,
            Self::NotReady { .. } | Self::BatchFailed(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BatchTooLarge { .. } | Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::QueueUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(kind = self.kind(), "Request failed: {}", self);
        }

        let mut error = json!({
            "type": self.kind(),
            "message": self.to_string()
        });
        if let Self::NotReady { status } = &self {
            error["status"] = json!(status);
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

impl From<JsonRejection> for GatewayError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::PayloadTooLarge(rejection.body_text())
        } else {
            Self::InvalidRequest(rejection.body_text())
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_error_converts_to_invocation_error() {
        let err: GatewayError = ModelError::Timeout(30).into();
        assert_eq!(err.kind(), "model_invocation_failed");
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert!(err.to_string().contains("timed out after 30s"));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(GatewayError::InvalidModel("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(GatewayError::AccessDenied.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            GatewayError::NotReady { status: BatchStatus::Active }.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            GatewayError::BatchTooLarge { count: 2, max: 1 }.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            GatewayError::PayloadTooLarge("length limit exceeded".into()).status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            GatewayError::QueueUnavailable("closed".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_not_ready_message_includes_status() {
        let err = GatewayError::NotReady { status: BatchStatus::Queued };
        assert_eq!(err.to_string(), "Batch is not ready (status: queued)");
    }
}

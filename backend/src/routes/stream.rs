//! Streaming inference endpoint (Server-Sent Events).

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::DefaultBodyLimit;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{extract::State, routing::post, Json, Router};
use futures_util::stream::Stream;
use inference_common::StreamRequest;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::auth::Caller;
use crate::error::{GatewayError, Result};
use crate::gateway::DeliveryMode;
use crate::AppState;

/// POST /v1/inference/stream - Process inputs one at a time, pushing an event per input
async fn stream_inference(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    body: std::result::Result<Json<StreamRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let Json(request) = body.map_err(GatewayError::from)?;
    state.rate_limits.check(&caller.id, DeliveryMode::Stream)?;

    tracing::info!(
        caller = %caller.id,
        model = %request.model,
        inputs = request.inputs.len(),
        "Stream started"
    );

    let rx = state.streaming.stream(&request.model, request.inputs)?;

    let stream = ReceiverStream::new(rx).map(|event| {
        let sse = Event::default().event(event.event_name());
        Ok(match sse.json_data(&event) {
            Ok(sse) => sse,
            Err(e) => Event::default()
                .event("error")
                .data(encoding_failure(&e.to_string())),
        })
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

/// Payload sent in place of an event that could not be serialized.
fn encoding_failure(message: &str) -> String {
    serde_json::json!({"type": "error", "error": message}).to_string()
}

pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_request_body_bytes();
    Router::new()
        .route(
            "/inference/stream",
            post(stream_inference).layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_failure_payload_is_valid_json() {
        let message = r#"key must be a string: "map" \ at line 1"#;
        let payload: serde_json::Value = serde_json::from_str(&encoding_failure(message)).unwrap();
        assert_eq!(payload["type"], "error");
        assert_eq!(payload["error"], message);
        assert!(!encoding_failure("multi\nline").contains('\n'));
    }
}

//! Real-time inference endpoint.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::{extract::State, routing::post, Json, Router};
use chrono::Utc;
use inference_common::{InferenceRequest, InferenceResponse};

use crate::auth::Caller;
use crate::error::{GatewayError, Result};
use crate::gateway::DeliveryMode;
use crate::AppState;

/// POST /v1/inference - Run one input synchronously
async fn infer(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    body: std::result::Result<Json<InferenceRequest>, JsonRejection>,
) -> Result<Json<InferenceResponse>> {
    let Json(request) = body.map_err(GatewayError::from)?;
    state.rate_limits.check(&caller.id, DeliveryMode::Realtime)?;

    let options = request.options.unwrap_or_default();
    let result = state
        .realtime
        .execute(&request.model, &request.input, &options)
        .await?;

    tracing::debug!(
        caller = %caller.id,
        model = %request.model,
        cached = result.cached,
        latency_ms = result.latency_ms,
        "Inference served"
    );

    Ok(Json(InferenceResponse {
        result: result.output.unwrap_or_default(),
        cached: result.cached,
        latency_ms: result.latency_ms,
        model: result.model,
        timestamp: Utc::now(),
    }))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/inference", post(infer))
        .with_state(state)
}

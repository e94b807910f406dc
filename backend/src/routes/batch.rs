//! Batch endpoints.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use inference_common::{BatchStatusView, ResultFormat, SubmitBatchRequest};
use serde::Deserialize;

use crate::auth::Caller;
use crate::error::{GatewayError, Result};
use crate::gateway::{BatchResults, DeliveryMode};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
struct ResultsQuery {
    #[serde(default)]
    format: ResultFormat,
}

/// POST /v1/batch - Queue a batch and return immediately
async fn submit_batch(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    body: std::result::Result<Json<SubmitBatchRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(request) = body.map_err(GatewayError::from)?;
    state.rate_limits.check(&caller.id, DeliveryMode::Batch)?;

    let submitted = state
        .batches
        .submit(
            &caller.id,
            &request.model,
            request.inputs,
            request.options.unwrap_or_default(),
        )
        .await?;

    Ok((StatusCode::ACCEPTED, Json(submitted)).into_response())
}

/// GET /v1/batch/:id - Batch status
async fn batch_status(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(batch_id): Path<String>,
) -> Result<Json<BatchStatusView>> {
    Ok(Json(state.batches.get_status(&batch_id, &caller.id).await?))
}

/// GET /v1/batch/:id/results - Results of a completed batch as JSON or CSV
async fn batch_results(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(batch_id): Path<String>,
    query: std::result::Result<Query<ResultsQuery>, axum::extract::rejection::QueryRejection>,
) -> Result<Response> {
    let Query(query) = query.map_err(|e| GatewayError::InvalidRequest(e.body_text()))?;

    match state
        .batches
        .get_results(&batch_id, &caller.id, query.format)
        .await?
    {
        BatchResults::Json(results) => Ok(Json(results).into_response()),
        BatchResults::Csv(body) => {
            let disposition = format!("attachment; filename=\"{}.csv\"", batch_id);
            Ok((
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                body,
            )
                .into_response())
        }
    }
}

/// DELETE /v1/batch/:id - Request cancellation
async fn cancel_batch(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(batch_id): Path<String>,
) -> Result<Json<BatchStatusView>> {
    Ok(Json(state.batches.cancel(&batch_id, &caller.id).await?))
}

pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_request_body_bytes();
    Router::new()
        .route(
            "/batch",
            post(submit_batch).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/batch/:id", get(batch_status).delete(cancel_batch))
        .route("/batch/:id/results", get(batch_results))
        .with_state(state)
}

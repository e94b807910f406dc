//! Model catalog endpoint.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use inference_common::ModelsResponse;

use crate::AppState;

/// GET /v1/models - List invocable models with their schemas and limits
async fn list_models(State(state): State<Arc<AppState>>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        object: "list".to_string(),
        data: state.registry.catalog(),
    })
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/models", get(list_models))
        .with_state(state)
}

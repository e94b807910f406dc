use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use serde::{Deserialize, Serialize};

use crate::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Default, Deserialize)]
struct MetricsQuery {
    #[serde(default)]
    format: Option<String>,
}

async fn metrics(State(state): State<Arc<AppState>>, Query(query): Query<MetricsQuery>) -> Response {
    if query.format.as_deref() == Some("json") {
        return Json(state.metrics.snapshot()).into_response();
    }

    let version = env!("CARGO_PKG_VERSION");
    let mut body = format!(
        "# HELP gateway_up Whether the service is up\n\
         # TYPE gateway_up gauge\n\
         gateway_up 1\n\
         # HELP gateway_info Service information\n\
         # TYPE gateway_info gauge\n\
         gateway_info{{version=\"{}\"}} 1\n\
         # HELP gateway_queue_pending Batch jobs waiting for a worker\n\
         # TYPE gateway_queue_pending gauge\n\
         gateway_queue_pending {}\n",
        version,
        state.queue.pending_count().await
    );
    body.push_str(&state.metrics.render_prometheus());

    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

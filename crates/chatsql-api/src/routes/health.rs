//! Ambient liveness/metrics endpoints, no conversational state involved.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

pub async fn healthz(State(_state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn metrics() -> impl IntoResponse {
    match crate::metrics::render() {
        Some(body) => (StatusCode::OK, body),
        None => (StatusCode::OK, String::new()),
    }
}

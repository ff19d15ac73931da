// src/api.rs
use std::sync::Arc;

use shuttle_axum::axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::fetcher::TrendFetcher;

#[derive(Clone)]
pub struct AppState {
    pub fetcher: Arc<TrendFetcher>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/fetch", post(fetch))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Any JSON body gets the envelope back with 200, even when the request is
/// invalid (that is reported inside as `INVALID_INPUT`). Only bodies that are
/// not JSON at all are a 400.
async fn fetch(State(state): State<AppState>, body: Bytes) -> Response {
    let raw: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": format!("body is not JSON: {e}") })),
            )
                .into_response();
        }
    };
    Json(state.fetcher.fetch_value(&raw).await).into_response()
}

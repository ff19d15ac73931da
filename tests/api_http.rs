// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - POST /fetch (valid, invalid request, non-JSON body)

mod common;

use common::*;
use serde_json::Value as Json;
use shuttle_axum::axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use tower::ServiceExt as _; // for `oneshot`

use trend_fetcher::{router, AppState};

const BODY_LIMIT: usize = 1024 * 1024; // 1MB, safe for tests

fn test_router() -> Router {
    let h = Harness::new(CountingSource::standard());
    router(AppState {
        fetcher: h.fetcher.clone(),
    })
}

async fn post_fetch(app: Router, body: String) -> (StatusCode, Vec<u8>) {
    let req = Request::builder()
        .method("POST")
        .uri("/fetch")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .expect("build POST /fetch");
    let resp = app.oneshot(req).await.expect("oneshot /fetch");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    (status, bytes)
}

#[tokio::test]
async fn api_health_returns_200_and_ok_body() {
    let app = test_router();

    let req = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .expect("build GET /health");

    let resp = app.oneshot(req).await.expect("oneshot /health");
    assert_eq!(resp.status(), StatusCode::OK, "health should be 200");

    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    let body = String::from_utf8(bytes).expect("utf8");
    assert_eq!(body.trim(), "OK", "health body should be 'OK'");
}

#[tokio::test]
async fn api_fetch_returns_the_envelope() {
    let (status, bytes) = post_fetch(test_router(), raw_request().to_string()).await;
    assert_eq!(status, StatusCode::OK);

    let v: Json = serde_json::from_slice(&bytes).expect("valid JSON");
    assert_eq!(v["task_id"], "550e8400-e29b-41d4-a716-446655440000");
    assert_eq!(v["status"], "success");
    assert_eq!(v["result"]["trends"].as_array().map(|a| a.len()), Some(3));
    assert_eq!(v["result"]["metadata"]["moltbook_api_calls"], 1);
}

#[tokio::test]
async fn api_fetch_invalid_request_is_200_with_invalid_input() {
    let mut raw = raw_request();
    raw["parameters"]["max_topics"] = serde_json::json!(99);

    let (status, bytes) = post_fetch(test_router(), raw.to_string()).await;
    assert_eq!(status, StatusCode::OK);

    let v: Json = serde_json::from_slice(&bytes).expect("valid JSON");
    assert_eq!(v["status"], "failed");
    assert!(v["result"].is_null());
    assert_eq!(v["errors"][0]["code"], "INVALID_INPUT");
    assert_eq!(v["errors"][0]["recoverable"], false);
}

#[tokio::test]
async fn api_fetch_non_json_body_is_400() {
    let (status, bytes) = post_fetch(test_router(), "not json".into()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let v: Json = serde_json::from_slice(&bytes).expect("error body is JSON");
    assert!(v["error"].is_string());
}

// tests/status_http.rs
//
// Status router exercised in-process via tower::ServiceExt::oneshot.

use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use tower::ServiceExt as _; // for `oneshot`

use newswire_relay::metrics::Telemetry;

const BODY_LIMIT: usize = 1024 * 1024;

async fn get(path: &str) -> (StatusCode, String) {
    let app = Telemetry::detached().router();
    let req = Request::builder()
        .method("GET")
        .uri(path)
        .body(Body::empty())
        .expect("build request");
    let resp = app.oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    (status, String::from_utf8(bytes).expect("utf8"))
}

#[tokio::test]
async fn health_returns_ok() {
    let (status, body) = get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn metrics_renders_text() {
    let (status, _body) = get("/metrics").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn unknown_route_is_404() {
    let (status, _) = get("/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

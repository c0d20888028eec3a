//! End-to-end tests of the HTTP surface, driven through the router with
//! the deterministic testing source.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use patches_server::{
    api::{self, AppState},
    config::StateConfig,
    server::ServerState,
    sources::{SourceConfigs, TestingSourceConfig},
};

fn stub_router(vulns: usize, max_active: usize, max_queued: usize) -> Router {
    let mut config = StateConfig::new(SourceConfigs {
        clair: None,
        testing: Some(TestingSourceConfig { vulns }),
    });
    config.max_active_sessions = max_active;
    config.max_queued_sessions = max_queued;

    let state = ServerState::configure(config, reqwest::Client::new());
    api::router(Arc::new(AppState { state }))
}

async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request");
    let response = router.clone().oneshot(request).await.expect("response");

    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(
        content_type.starts_with("application/json"),
        "expected a JSON response, got content-type {content_type:?}"
    );

    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let json = serde_json::from_slice(&bytes).expect("json body");

    (status, json)
}

#[tokio::test]
async fn opening_a_session_requires_a_supported_platform() {
    let router = stub_router(10, 1, 3);

    let (status, body) = get(&router, "/?platform=__testing_stub__").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["error"].is_null());
    assert!(!body["session"].as_str().expect("session id").is_empty());

    let (status, body) = get(&router, "/?platform=centos:7").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn admissions_beyond_the_bounds_are_rejected() {
    let router = stub_router(10, 1, 3);

    // One session is activated by the tick, three more fill the queue.
    for _ in 0..4 {
        let (status, _) = get(&router, "/?platform=__testing_stub__").await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = get(&router, "/?platform=__testing_stub__").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn a_session_drains_the_feed_and_is_retired() {
    let router = stub_router(10, 1, 3);

    let (status, body) = get(&router, "/?platform=__testing_stub__").await;
    assert_eq!(status, StatusCode::OK);
    let session_id = body["session"].as_str().expect("session id").to_string();

    // The tick in front of this request activates the session and fills the
    // bucket, so the whole stub feed arrives in one batch.
    let (status, body) = get(&router, &format!("/?session={session_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["error"].is_null());
    let vulns = body["vulnerabilities"].as_array().expect("batch");
    assert_eq!(vulns.len(), 10);
    assert_eq!(vulns[0]["name"], "testvuln");
    assert_eq!(vulns[0]["severity"], "low");
    assert_eq!(vulns[0]["fixedIn"][0]["name"], "testpackage");
    assert_eq!(vulns[0]["fixedIn"][0]["version"], "1.2.3");

    // Everything was read and the source is exhausted: the tick retires the
    // session, so polling again reports it gone.
    let (status, body) = get(&router, &format!("/?session={session_id}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn an_unknown_session_is_rejected() {
    let router = stub_router(10, 1, 3);

    let (status, body) = get(&router, "/?session=not-a-session").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn a_queued_session_cannot_fetch_yet() {
    let router = stub_router(10, 1, 3);

    // The first session is activated by a later tick; the second stays
    // queued behind the single active slot.
    let (_, body) = get(&router, "/?platform=__testing_stub__").await;
    let first = body["session"].as_str().expect("session id").to_string();
    let (_, body) = get(&router, "/?platform=__testing_stub__").await;
    let second = body["session"].as_str().expect("session id").to_string();

    let (status, _) = get(&router, &format!("/?session={first}")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = get(&router, &format!("/?session={second}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn exactly_one_query_parameter_is_required() {
    let router = stub_router(10, 1, 3);

    let (status, body) = get(&router, "/").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = get(&router, "/?platform=__testing_stub__&session=abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn health_reports_ok() {
    let router = stub_router(10, 1, 3);

    let (status, body) = get(&router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

//! HTTP transport for the patches server.
//!
//! A single `GET /` endpoint with mutually exclusive query parameters:
//! `?platform=<tag>` opens a session, `?session=<id>` fetches the next
//! batch. Every request runs the housekeeping tick before branching, and
//! every response body is JSON.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::server::ServerState;

/// Shared application state handed to every handler.
pub struct AppState {
    pub state: ServerState,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct RootParams {
    platform: Option<String>,
    session: Option<String>,
}

async fn root(State(app): State<Arc<AppState>>, Query(params): Query<RootParams>) -> Response {
    app.state.update().await;

    match (params.platform, params.session) {
        (Some(platform), None) => match app.state.queue_session(&platform).await {
            Some(session_id) => {
                (StatusCode::OK, Json(json!({ "error": null, "session": session_id })))
                    .into_response()
            }
            None => bad_request("platform is not supported or the session queue is full"),
        },
        (None, Some(session_id)) => match app.state.retrieve_vulns(&session_id).await {
            Some(vulns) => {
                (StatusCode::OK, Json(json!({ "error": null, "vulnerabilities": vulns })))
                    .into_response()
            }
            None => bad_request("session is unknown, queued, or expired"),
        },
        _ => bad_request("exactly one of `platform` or `session` is required"),
    }
}

async fn health() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

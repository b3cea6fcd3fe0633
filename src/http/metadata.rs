//! Refresh orchestrator endpoints.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::http::state::AppState;
use crate::http::{json_error, require_within_roots};

#[derive(Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    path: String,
}

#[derive(Serialize)]
struct RefreshResponse {
    success: bool,
    message: String,
    queue_position: usize,
}

/// POST /api/metadata/refresh — start or enqueue a refresh of a root.
pub async fn refresh(
    State(state): State<AppState>,
    body: Result<Json<RefreshRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = body else {
        return json_error(StatusCode::BAD_REQUEST, "invalid request body");
    };
    if req.path.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "path is required");
    }

    let (path, _) = match require_within_roots(&state, &req.path).await {
        Ok(ok) => ok,
        Err(resp) => return resp,
    };

    let outcome = state.refresh.clone().start(path);
    Json(RefreshResponse {
        success: true,
        message: outcome.message(),
        queue_position: outcome.position(),
    })
    .into_response()
}

/// GET /api/metadata/status — live snapshot of the orchestrator.
pub async fn status(State(state): State<AppState>) -> Response {
    Json(state.refresh.status()).into_response()
}

/// POST /api/metadata/cancel — cancel the running job, if any.
pub async fn cancel(State(state): State<AppState>) -> Response {
    if state.refresh.cancel() {
        Json(serde_json::json!({
            "success": true,
            "message": "Scan cancelled",
        }))
        .into_response()
    } else {
        Json(serde_json::json!({
            "success": false,
            "message": "No scan in progress",
        }))
        .into_response()
    }
}

#[derive(Deserialize)]
pub struct QueuePathQuery {
    #[serde(default)]
    path: String,
}

/// DELETE /api/metadata/queue?path= — drop a waiting root from the queue.
pub async fn queue_remove(
    State(state): State<AppState>,
    Query(query): Query<QueuePathQuery>,
) -> Response {
    if query.path.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "path is required");
    }
    if !state.refresh.remove_from_queue(&query.path) {
        return json_error(StatusCode::NOT_FOUND, "path not in queue");
    }
    Json(serde_json::json!({
        "success": true,
        "message": "Removed from queue",
    }))
    .into_response()
}

#[derive(Deserialize)]
pub struct PrioritizeRequest {
    #[serde(default)]
    path: String,
}

/// POST /api/metadata/queue/prioritize — move a waiting root to the head.
pub async fn queue_prioritize(
    State(state): State<AppState>,
    body: Result<Json<PrioritizeRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = body else {
        return json_error(StatusCode::BAD_REQUEST, "invalid request body");
    };
    if req.path.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "path is required");
    }
    if !state.refresh.prioritize(&req.path) {
        return json_error(StatusCode::NOT_FOUND, "path not in queue");
    }
    Json(serde_json::json!({
        "success": true,
        "message": "Moved to top of queue",
    }))
    .into_response()
}

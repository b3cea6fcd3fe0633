//! HTTP surface: JSON API plus the byte-serving endpoints.

pub mod api;
pub mod cast;
pub mod metadata;
pub mod playlist;
pub mod state;
pub mod stream;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::state::AppState;
use crate::paths;
use crate::scanner;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(identity))
        .route("/api/roots", get(api::roots))
        .route("/api/browse", get(api::browse))
        .route("/api/stream", get(stream::stream_audio))
        .route("/api/image", get(stream::serve_image))
        .route("/api/thumbnail", get(stream::serve_thumbnail))
        .route("/api/video", get(stream::serve_video))
        .route("/api/metadata/refresh", post(metadata::refresh))
        .route("/api/metadata/status", get(metadata::status))
        .route("/api/metadata/cancel", post(metadata::cancel))
        .route("/api/metadata/queue", delete(metadata::queue_remove))
        .route("/api/metadata/queue/prioritize", post(metadata::queue_prioritize))
        .route("/api/playlists", get(playlist::list))
        .route(
            "/api/playlist",
            get(playlist::read).post(playlist::create).delete(playlist::remove_playlist),
        )
        .route("/api/playlist/add", post(playlist::add))
        .route("/api/playlist/remove", post(playlist::remove_song))
        .route("/api/playlist/reorder", post(playlist::reorder))
        .route("/api/playlist/check", get(playlist::check))
        .route("/api/cast/devices", get(cast::devices))
        .route("/api/cast/connect", post(cast::connect))
        .route("/api/cast/disconnect", post(cast::disconnect))
        .route("/api/cast/play", post(cast::play))
        .route("/api/cast/pause", post(cast::pause))
        .route("/api/cast/resume", post(cast::resume))
        .route("/api/cast/stop", post(cast::stop))
        .route("/api/cast/seek", post(cast::seek))
        .route("/api/cast/volume", post(cast::volume))
        .route("/api/cast/status", get(cast::status))
        .method_not_allowed_fallback(method_not_allowed)
        .layer(middleware::from_fn_with_state(state.clone(), capture_base_url))
        .layer(TraceLayer::new_for_http())
        // The Cast receiver fetches media over the network, so the byte
        // endpoints must be reachable cross-origin.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers([header::RANGE])
                .expose_headers([header::CONTENT_LENGTH, header::CONTENT_RANGE]),
        )
        .with_state(state)
}

async fn identity() -> Response {
    Json(serde_json::json!({
        "name": "q2",
        "version": env!("GIT_VERSION"),
    }))
    .into_response()
}

async fn method_not_allowed() -> Response {
    json_error(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
}

/// Record the externally visible base URL whenever a cast session is live
/// (or about to be), so media URLs handed to devices point back at us.
async fn capture_base_url(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if state.cast.is_connected() || req.uri().path() == "/api/cast/connect" {
        if let Some(host) = req
            .headers()
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
        {
            state.cast.set_base_url(format!("http://{host}"));
        }
    }
    next.run(req).await
}

/// Uniform error body: `{"error": "..."}`.
pub(crate) fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

/// Clean a caller-supplied path, or produce the 400 response.
pub(crate) fn clean_path_or_400(path: &str) -> Result<String, Response> {
    paths::clean(path).ok_or_else(|| json_error(StatusCode::BAD_REQUEST, "invalid path"))
}

/// Enforce the path-security invariant: the cleaned path must fall within a
/// registered root. Returns the cleaned path and the matching root.
pub(crate) async fn require_within_roots(
    state: &AppState,
    raw_path: &str,
) -> Result<(String, String), Response> {
    if raw_path.is_empty() {
        return Err(json_error(StatusCode::BAD_REQUEST, "path parameter required"));
    }
    let cleaned = clean_path_or_400(raw_path)?;

    let roots = scanner::monitored_folders(&state.db)
        .await
        .map_err(|e| {
            tracing::error!("failed to load roots: {e}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "database error")
        })?;

    match paths::matching_root(&cleaned, &roots) {
        Some(root) => Ok((cleaned, root.to_owned())),
        None => Err(json_error(
            StatusCode::FORBIDDEN,
            "path not within monitored folders",
        )),
    }
}

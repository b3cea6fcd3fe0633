//! Chromecast control endpoints.

use std::path::Path;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::cast::CastError;
use crate::http::state::AppState;
use crate::http::{json_error, require_within_roots};
use crate::media::mime;

const DISCOVER_TIMEOUT: Duration = Duration::from_secs(10);

fn cast_error(e: CastError) -> Response {
    let status = match &e {
        CastError::DeviceNotFound(_) => StatusCode::NOT_FOUND,
        CastError::NotConnected | CastError::NoBaseUrl => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    json_error(status, &e.to_string())
}

#[derive(Deserialize)]
pub struct DevicesQuery {
    #[serde(rename = "type")]
    #[serde(default)]
    device_type: Option<String>,
}

/// GET /api/cast/devices — discover devices; `?type=audio|video` filters the
/// speaker-class heuristic either way.
pub async fn devices(
    State(state): State<AppState>,
    Query(query): Query<DevicesQuery>,
) -> Response {
    let all = match state.cast.clone().discover(DISCOVER_TIMEOUT).await {
        Ok(d) => d,
        Err(e) => return cast_error(e),
    };
    let devices: Vec<_> = all
        .into_iter()
        .filter(|d| match query.device_type.as_deref() {
            Some("audio") => d.is_audio,
            Some("video") => !d.is_audio,
            _ => true,
        })
        .collect();
    Json(serde_json::json!({ "devices": devices })).into_response()
}

#[derive(Deserialize)]
pub struct ConnectRequest {
    #[serde(default)]
    uuid: String,
}

/// POST /api/cast/connect — open a session to a discovered device.
pub async fn connect(
    State(state): State<AppState>,
    body: Result<Json<ConnectRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = body else {
        return json_error(StatusCode::BAD_REQUEST, "invalid request body");
    };
    if req.uuid.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "uuid is required");
    }
    match state.cast.clone().connect(&req.uuid).await {
        Ok(device) => Json(serde_json::json!({
            "success": true,
            "device": device,
        }))
        .into_response(),
        Err(e) => cast_error(e),
    }
}

/// POST /api/cast/disconnect
pub async fn disconnect(State(state): State<AppState>) -> Response {
    state.cast.disconnect();
    Json(serde_json::json!({ "success": true })).into_response()
}

#[derive(Deserialize)]
pub struct PlayRequest {
    #[serde(default)]
    path: String,
    #[serde(default)]
    content_type: String,
    #[serde(default)]
    title: String,
}

/// POST /api/cast/play — load a local file on the connected device. The path
/// is held to the same security invariant as the byte endpoints.
pub async fn play(
    State(state): State<AppState>,
    body: Result<Json<PlayRequest>, JsonRejection>,
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

    let content_type = if req.content_type.is_empty() {
        derived_content_type(&path)
    } else {
        req.content_type.clone()
    };
    let title = if req.title.is_empty() {
        Path::new(&path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    } else {
        req.title.clone()
    };

    match state.cast.clone().play_media(&path, &content_type, &title).await {
        Ok(media_url) => Json(serde_json::json!({
            "success": true,
            "media_url": media_url,
        }))
        .into_response(),
        Err(e) => cast_error(e),
    }
}

fn derived_content_type(path: &str) -> String {
    let path = Path::new(path);
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match mime::kind_of_path(path) {
        Some(mime::MediaKind::Audio) => mime::audio_content_type(&ext),
        Some(mime::MediaKind::Image) => mime::image_content_type(&ext),
        Some(mime::MediaKind::Video) => mime::video_content_type(&ext),
        None => None,
    }
    .unwrap_or("application/octet-stream")
    .to_owned()
}

/// POST /api/cast/pause
pub async fn pause(State(state): State<AppState>) -> Response {
    match state.cast.pause().await {
        Ok(()) => Json(serde_json::json!({ "success": true })).into_response(),
        Err(e) => cast_error(e),
    }
}

/// POST /api/cast/resume
pub async fn resume(State(state): State<AppState>) -> Response {
    match state.cast.resume().await {
        Ok(()) => Json(serde_json::json!({ "success": true })).into_response(),
        Err(e) => cast_error(e),
    }
}

/// POST /api/cast/stop
pub async fn stop(State(state): State<AppState>) -> Response {
    match state.cast.stop().await {
        Ok(()) => Json(serde_json::json!({ "success": true })).into_response(),
        Err(e) => cast_error(e),
    }
}

#[derive(Deserialize)]
pub struct SeekRequest {
    #[serde(default)]
    position: f64,
}

/// POST /api/cast/seek
pub async fn seek(
    State(state): State<AppState>,
    body: Result<Json<SeekRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = body else {
        return json_error(StatusCode::BAD_REQUEST, "invalid request body");
    };
    if req.position < 0.0 {
        return json_error(StatusCode::BAD_REQUEST, "position must be non-negative");
    }
    match state.cast.seek(req.position).await {
        Ok(()) => Json(serde_json::json!({ "success": true })).into_response(),
        Err(e) => cast_error(e),
    }
}

#[derive(Deserialize)]
pub struct VolumeRequest {
    #[serde(default)]
    level: f64,
    #[serde(default)]
    muted: Option<bool>,
}

/// POST /api/cast/volume — set the level (0..1) and optionally the mute flag.
pub async fn volume(
    State(state): State<AppState>,
    body: Result<Json<VolumeRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = body else {
        return json_error(StatusCode::BAD_REQUEST, "invalid request body");
    };
    if !(0.0..=1.0).contains(&req.level) {
        return json_error(StatusCode::BAD_REQUEST, "level must be between 0 and 1");
    }
    if let Err(e) = state.cast.set_volume(req.level).await {
        return cast_error(e);
    }
    if let Some(muted) = req.muted {
        if let Err(e) = state.cast.set_muted(muted).await {
            return cast_error(e);
        }
    }
    Json(serde_json::json!({ "success": true })).into_response()
}

/// GET /api/cast/status — playback snapshot, refreshed from the device.
pub async fn status(State(state): State<AppState>) -> Response {
    Json(state.cast.status().await).into_response()
}

//! Playlist CRUD over the on-disk M3U store.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::http::state::AppState;
use crate::http::json_error;
use crate::playlist::{PlaylistError, Song};

fn playlist_error(e: PlaylistError) -> Response {
    let status = match &e {
        PlaylistError::AlreadyExists => StatusCode::CONFLICT,
        PlaylistError::NotFound => StatusCode::NOT_FOUND,
        PlaylistError::InvalidIndex => StatusCode::BAD_REQUEST,
        PlaylistError::OutsideDirectory => StatusCode::FORBIDDEN,
        PlaylistError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    json_error(status, &e.to_string())
}

/// GET /api/playlists — every playlist with its entry count.
pub async fn list(State(state): State<AppState>) -> Response {
    match state.playlists.list() {
        Ok(playlists) => Json(serde_json::json!({ "playlists": playlists })).into_response(),
        Err(e) => playlist_error(e),
    }
}

#[derive(Deserialize)]
pub struct PlaylistPathQuery {
    #[serde(default)]
    path: String,
}

#[derive(Serialize)]
struct PlaylistResponse {
    name: String,
    path: String,
    songs: Vec<Song>,
}

/// GET /api/playlist?path= — read one playlist.
pub async fn read(
    State(state): State<AppState>,
    Query(query): Query<PlaylistPathQuery>,
) -> Response {
    if query.path.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "path parameter required");
    }
    match state.playlists.read(&query.path) {
        Ok((name, songs)) => Json(PlaylistResponse {
            name,
            path: query.path,
            songs,
        })
        .into_response(),
        Err(e) => playlist_error(e),
    }
}

#[derive(Deserialize)]
pub struct CreateRequest {
    #[serde(default)]
    name: String,
}

/// POST /api/playlist — create an empty playlist.
pub async fn create(
    State(state): State<AppState>,
    body: Result<Json<CreateRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = body else {
        return json_error(StatusCode::BAD_REQUEST, "invalid request body");
    };
    if req.name.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "name is required");
    }
    match state.playlists.create(&req.name) {
        Ok((name, path)) => Json(serde_json::json!({
            "success": true,
            "name": name,
            "path": path.to_string_lossy(),
        }))
        .into_response(),
        Err(e) => playlist_error(e),
    }
}

/// DELETE /api/playlist?path= — delete a playlist file.
pub async fn remove_playlist(
    State(state): State<AppState>,
    Query(query): Query<PlaylistPathQuery>,
) -> Response {
    if query.path.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "path parameter required");
    }
    match state.playlists.delete(&query.path) {
        Ok(()) => Json(serde_json::json!({ "success": true })).into_response(),
        Err(e) => playlist_error(e),
    }
}

#[derive(Deserialize)]
pub struct AddRequest {
    #[serde(default)]
    playlist: String,
    #[serde(default)]
    song: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    duration: i64,
}

/// POST /api/playlist/add — append a song, deduplicated by normalized path.
pub async fn add(
    State(state): State<AppState>,
    body: Result<Json<AddRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = body else {
        return json_error(StatusCode::BAD_REQUEST, "invalid request body");
    };
    if req.playlist.is_empty() || req.song.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "playlist and song are required");
    }
    let title = if req.title.is_empty() { None } else { Some(req.title.as_str()) };
    match state.playlists.add(&req.playlist, &req.song, title, req.duration) {
        Ok(already_exists) => Json(serde_json::json!({
            "success": true,
            "already_exists": already_exists,
        }))
        .into_response(),
        Err(e) => playlist_error(e),
    }
}

#[derive(Deserialize)]
pub struct RemoveRequest {
    #[serde(default)]
    playlist: String,
    #[serde(default)]
    index: i64,
}

/// POST /api/playlist/remove — drop the song at an index.
pub async fn remove_song(
    State(state): State<AppState>,
    body: Result<Json<RemoveRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = body else {
        return json_error(StatusCode::BAD_REQUEST, "invalid request body");
    };
    if req.playlist.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "playlist is required");
    }
    if req.index < 0 {
        return json_error(StatusCode::BAD_REQUEST, "invalid index");
    }
    match state.playlists.remove(&req.playlist, req.index as usize) {
        Ok(()) => Json(serde_json::json!({ "success": true })).into_response(),
        Err(e) => playlist_error(e),
    }
}

#[derive(Deserialize)]
pub struct ReorderRequest {
    #[serde(default)]
    playlist: String,
    #[serde(default)]
    from_index: i64,
    #[serde(default)]
    to_index: i64,
}

/// POST /api/playlist/reorder — move a song to a new position.
pub async fn reorder(
    State(state): State<AppState>,
    body: Result<Json<ReorderRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = body else {
        return json_error(StatusCode::BAD_REQUEST, "invalid request body");
    };
    if req.playlist.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "playlist is required");
    }
    if req.from_index < 0 || req.to_index < 0 {
        return json_error(StatusCode::BAD_REQUEST, "invalid index");
    }
    match state
        .playlists
        .reorder(&req.playlist, req.from_index as usize, req.to_index as usize)
    {
        Ok(()) => Json(serde_json::json!({ "success": true })).into_response(),
        Err(e) => playlist_error(e),
    }
}

#[derive(Deserialize)]
pub struct CheckQuery {
    #[serde(default)]
    song: String,
}

/// GET /api/playlist/check?song= — membership of a song across playlists.
pub async fn check(State(state): State<AppState>, Query(query): Query<CheckQuery>) -> Response {
    if query.song.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "song parameter required");
    }
    match state.playlists.check(&query.song) {
        Ok(playlists) => Json(serde_json::json!({ "playlists": playlists })).into_response(),
        Err(e) => playlist_error(e),
    }
}

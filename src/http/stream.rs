//! Byte-serving endpoints: audio, images, cached thumbnails, and video with
//! on-demand audio transcoding.

use std::path::{Path, PathBuf};

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use http_range_header::parse_range_header;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use crate::http::state::AppState;
use crate::http::{json_error, require_within_roots};
use crate::media::{mime, thumbnail};

#[derive(Deserialize)]
pub struct PathQuery {
    #[serde(default)]
    path: String,
}

#[derive(Deserialize)]
pub struct ThumbnailQuery {
    #[serde(default)]
    path: String,
    #[serde(default)]
    size: Option<String>,
}

/// Shared validation for the byte endpoints: path security, existence, and
/// family membership. Returns the cleaned path.
async fn checked_file(
    state: &AppState,
    raw_path: &str,
    is_family: fn(&Path) -> bool,
    family_error: &str,
) -> Result<String, Response> {
    let (path, _) = require_within_roots(state, raw_path).await?;

    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_dir() => {
            return Err(json_error(StatusCode::BAD_REQUEST, "path is a directory"));
        }
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(json_error(StatusCode::NOT_FOUND, "file not found"));
        }
        Err(_) => return Err(json_error(StatusCode::INTERNAL_SERVER_ERROR, "cannot access file")),
    }

    if !is_family(Path::new(&path)) {
        return Err(json_error(StatusCode::BAD_REQUEST, family_error));
    }
    Ok(path)
}

fn content_type_for(path: &str, lookup: fn(&str) -> Option<&'static str>) -> &'static str {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .and_then(|e| lookup(&e))
        .unwrap_or("application/octet-stream")
}

/// GET /api/stream — range-serve an audio file.
pub async fn stream_audio(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
    headers: HeaderMap,
) -> Response {
    tracing::debug!("stream request: {} (range: {:?})", query.path, headers.get(header::RANGE));
    let path = match checked_file(&state, &query.path, mime::is_audio_path, "not an audio file").await
    {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let content_type = content_type_for(&path, mime::audio_content_type);
    serve_file_ranged(Path::new(&path), content_type, &headers, &[]).await
}

/// GET /api/image — serve an image file.
pub async fn serve_image(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
    headers: HeaderMap,
) -> Response {
    let path = match checked_file(&state, &query.path, mime::is_image_path, "not an image file").await
    {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let content_type = content_type_for(&path, mime::image_content_type);
    serve_file_ranged(Path::new(&path), content_type, &headers, &[]).await
}

/// GET /api/thumbnail — serve a cached thumbnail for a source path; 404 if
/// the cache has not been populated by a refresh.
pub async fn serve_thumbnail(
    State(state): State<AppState>,
    Query(query): Query<ThumbnailQuery>,
    headers: HeaderMap,
) -> Response {
    let (source_path, _) = match require_within_roots(&state, &query.path).await {
        Ok(ok) => ok,
        Err(resp) => return resp,
    };

    let size = match query.size.as_deref() {
        Some("large") => thumbnail::LARGE_SIZE,
        _ => thumbnail::SMALL_SIZE,
    };

    let rel = thumbnail::rel_path(Path::new(&source_path), size);
    let full: PathBuf = state.layout.base().join(rel);

    match tokio::fs::metadata(&full).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return json_error(
                StatusCode::NOT_FOUND,
                "thumbnail not found, run metadata refresh first",
            );
        }
        Err(_) => {
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "cannot access thumbnail")
        }
    }

    let cache = (header::CACHE_CONTROL, HeaderValue::from_static("public, max-age=31536000"));
    serve_file_ranged(&full, "image/jpeg", &headers, &[cache]).await
}

/// GET /api/video — serve a video, transcoding the audio track to AAC when
/// its codec is not natively playable. Transcoded responses cannot honor
/// Range requests.
pub async fn serve_video(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
    headers: HeaderMap,
) -> Response {
    let path = match checked_file(&state, &query.path, mime::is_video_path, "not a video file").await
    {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let needs_transcode = match state.ffmpeg.clone().probe(Path::new(&path)).await {
        Ok(probe) => {
            let codec = probe.audio_codec().unwrap_or("").to_owned();
            let needed = probe.needs_transcoding();
            tracing::debug!(
                "video {}: audio codec {codec:?}, transcoding: {needed}",
                query.path
            );
            needed
        }
        Err(e) => {
            tracing::warn!("probe failed for {path} (serving directly): {e}");
            false
        }
    };

    if needs_transcode {
        let token = CancellationToken::new();
        let stream = match state.ffmpeg.clone().transcode_audio(Path::new(&path), &token).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("transcode spawn failed for {path}: {e}");
                return json_error(StatusCode::INTERNAL_SERVER_ERROR, "transcoding failed");
            }
        };
        let mut response_headers = HeaderMap::new();
        response_headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
        response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("none"));
        let body = Body::from_stream(ReaderStream::new(stream));
        return (StatusCode::OK, response_headers, body).into_response();
    }

    let content_type = content_type_for(&path, mime::video_content_type);
    serve_file_ranged(Path::new(&path), content_type, &headers, &[]).await
}

fn http_date(t: std::time::SystemTime) -> Option<HeaderValue> {
    let formatted = DateTime::<Utc>::from(t)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    HeaderValue::from_str(&formatted).ok()
}

/// RFC 7233 range-aware file delivery. Serves the first satisfiable range of
/// a Range request as 206, anything unparseable or out of bounds as 416, and
/// the whole file otherwise.
async fn serve_file_ranged(
    path: &Path,
    content_type: &'static str,
    req_headers: &HeaderMap,
    extra_headers: &[(header::HeaderName, HeaderValue)],
) -> Response {
    let meta = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(_) => return json_error(StatusCode::NOT_FOUND, "file not found"),
    };
    let file_size = meta.len();

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(file_size));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Some(last_modified) = meta.modified().ok().and_then(http_date) {
        headers.insert(header::LAST_MODIFIED, last_modified);
    }
    for (name, value) in extra_headers {
        headers.insert(name.clone(), value.clone());
    }

    if let Some(range_value) = req_headers.get(header::RANGE) {
        let Ok(range_str) = range_value.to_str() else {
            return range_not_satisfiable(file_size);
        };
        return range_response(path, file_size, range_str, headers).await;
    }

    let file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(e) => {
            tracing::error!("failed to open {}: {e}", path.display());
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "cannot open file");
        }
    };
    let body = Body::from_stream(ReaderStream::new(file));
    (StatusCode::OK, headers, body).into_response()
}

fn range_not_satisfiable(file_size: u64) -> Response {
    (
        StatusCode::RANGE_NOT_SATISFIABLE,
        [(header::CONTENT_RANGE, format!("bytes */{file_size}"))],
    )
        .into_response()
}

async fn range_response(
    path: &Path,
    file_size: u64,
    range_str: &str,
    mut headers: HeaderMap,
) -> Response {
    let Ok(parsed) = parse_range_header(range_str) else {
        return range_not_satisfiable(file_size);
    };
    // Multi-part ranges collapse to the first satisfiable one.
    let first = match parsed.validate(file_size) {
        Ok(ranges) => match ranges.into_iter().next() {
            Some(r) => r,
            None => return range_not_satisfiable(file_size),
        },
        Err(_) => return range_not_satisfiable(file_size),
    };

    let start = *first.start();
    let end = *first.end();
    let length = end - start + 1;

    let mut file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(e) => {
            tracing::error!("failed to open {}: {e}", path.display());
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "cannot open file");
        }
    };
    if let Err(e) = file.seek(std::io::SeekFrom::Start(start)).await {
        tracing::error!("failed to seek in {}: {e}", path.display());
        return json_error(StatusCode::INTERNAL_SERVER_ERROR, "cannot read file");
    }

    let content_range = format!("bytes {start}-{end}/{file_size}");
    headers.insert(
        header::CONTENT_RANGE,
        HeaderValue::from_str(&content_range)
            .unwrap_or_else(|_| HeaderValue::from_static("bytes 0-0/0")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));

    let body = Body::from_stream(ReaderStream::new(file.take(length)));
    (StatusCode::PARTIAL_CONTENT, headers, body).into_response()
}

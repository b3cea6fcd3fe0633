//! Roots listing and directory browsing.

use std::path::{Path, PathBuf};

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::http::state::AppState;
use crate::http::{json_error, require_within_roots};
use crate::media::mime;
use crate::paths;
use crate::scanner;
use crate::sql_params;

#[derive(Serialize)]
struct RootFolder {
    path: String,
    name: String,
}

#[derive(Serialize)]
struct RootsResponse {
    roots: Vec<RootFolder>,
}

pub async fn roots(State(state): State<AppState>) -> Response {
    let folders = match scanner::monitored_folders(&state.db).await {
        Ok(f) => f,
        Err(e) => {
            tracing::error!("failed to load roots: {e}");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "database error");
        }
    };

    let roots = folders
        .into_iter()
        .map(|path| RootFolder {
            name: basename(&path),
            path,
        })
        .collect();
    Json(RootsResponse { roots }).into_response()
}

fn basename(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_owned())
}

#[derive(Deserialize)]
pub struct BrowseQuery {
    #[serde(default)]
    path: String,
    #[serde(default)]
    metadata: Option<String>,
}

/// One row of a directory listing, with optional index enrichment.
#[derive(Serialize, Default)]
struct FileEntry {
    name: String,
    /// "file" or "dir".
    #[serde(rename = "type")]
    entry_type: &'static str,
    size: i64,
    /// ISO 8601.
    modified: String,
    #[serde(rename = "mediaType", skip_serializing_if = "Option::is_none")]
    media_type: Option<&'static str>,
    #[serde(rename = "thumbnailSmall", skip_serializing_if = "Option::is_none")]
    thumbnail_small: Option<String>,
    #[serde(rename = "thumbnailLarge", skip_serializing_if = "Option::is_none")]
    thumbnail_large: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    album: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<i64>,
}

#[derive(Serialize)]
struct BrowseResponse {
    path: String,
    /// None when the listed directory is itself a root.
    parent: Option<String>,
    entries: Vec<FileEntry>,
}

pub async fn browse(State(state): State<AppState>, Query(query): Query<BrowseQuery>) -> Response {
    let (path, matched_root) = match require_within_roots(&state, &query.path).await {
        Ok(ok) => ok,
        Err(resp) => return resp,
    };
    let include_metadata = query.metadata.as_deref() == Some("true");

    match tokio::fs::metadata(&path).await {
        Ok(meta) if !meta.is_dir() => {
            return json_error(StatusCode::BAD_REQUEST, "path is not a directory");
        }
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return json_error(StatusCode::NOT_FOUND, "path not found");
        }
        Err(_) => return json_error(StatusCode::INTERNAL_SERVER_ERROR, "cannot access path"),
    }

    let mut entries = match list_directory(&path).await {
        Ok(e) => e,
        Err(_) => return json_error(StatusCode::INTERNAL_SERVER_ERROR, "cannot read directory"),
    };

    if include_metadata {
        enrich_entries(&state, &path, &mut entries).await;
    }

    let parent = if paths::normalize(&path) == paths::normalize(&matched_root) {
        None
    } else {
        Path::new(&path)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
    };

    Json(BrowseResponse { path, parent, entries }).into_response()
}

async fn list_directory(path: &str) -> std::io::Result<Vec<FileEntry>> {
    let mut dir = tokio::fs::read_dir(path).await?;
    let mut entries = Vec::new();
    while let Some(entry) = dir.next_entry().await? {
        // Entries that vanish mid-listing are skipped, not fatal.
        let Ok(meta) = entry.metadata().await else { continue };
        let modified = meta
            .modified()
            .map(|t| DateTime::<Utc>::from(t).to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_default();
        entries.push(FileEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            entry_type: if meta.is_dir() { "dir" } else { "file" },
            size: meta.len() as i64,
            modified,
            ..FileEntry::default()
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Attach media type, thumbnail URLs, and audio tags from the index.
async fn enrich_entries(state: &AppState, dir_path: &str, entries: &mut [FileEntry]) {
    for entry in entries.iter_mut() {
        if entry.entry_type == "dir" {
            continue;
        }

        let full_path = PathBuf::from(dir_path).join(&entry.name);
        entry.media_type = mime::kind_of_path(&full_path).map(|k| k.as_str());

        let normalized = paths::normalize(&full_path.to_string_lossy());
        let row = state
            .db
            .query_row(
                "SELECT f.thumbnail_small_path, f.thumbnail_large_path,
                        am.title, am.artist, am.album, am.duration_seconds
                 FROM files f
                 LEFT JOIN audio_metadata am ON f.id = am.file_id
                 WHERE f.path = ?1",
                sql_params![normalized],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<i64>>(5)?,
                    ))
                },
            )
            .await;

        let Ok(Some((thumb_small, thumb_large, title, artist, album, duration))) = row else {
            continue;
        };

        let encoded = urlencoding::encode(&full_path.to_string_lossy()).into_owned();
        if thumb_small.is_some_and(|p| !p.is_empty()) {
            entry.thumbnail_small = Some(format!("/api/thumbnail?path={encoded}&size=small"));
        }
        if thumb_large.is_some_and(|p| !p.is_empty()) {
            entry.thumbnail_large = Some(format!("/api/thumbnail?path={encoded}&size=large"));
        }
        entry.title = title;
        entry.artist = artist;
        entry.album = album;
        entry.duration = duration;
    }
}

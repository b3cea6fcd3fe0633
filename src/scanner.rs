//! Filesystem scanner and index reconciler.
//!
//! A scan walks one registered folder depth-first, upserts a row per file,
//! and afterwards purges rows whose paths vanished from disk. Per-entry I/O
//! errors are collected and reported; they never abort the walk.

use std::collections::HashSet;
use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, SecondsFormat, Utc};
use walkdir::WalkDir;

use crate::db::{Db, DbError};
use crate::media::mime;
use crate::paths;
use crate::sql_params;

/// Classification used at scan time. Broader than the serving tables: it
/// also recognizes formats we index but cannot stream raw (HEIC, camera RAW).
pub fn scan_media_type(ext: &str) -> Option<&'static str> {
    match ext {
        "jpg" | "jpeg" | "png" | "gif" | "bmp" | "webp" | "tiff" | "tif" | "heic" | "heif"
        | "raw" | "cr2" | "nef" => Some("image"),
        "mp4" | "avi" | "mkv" | "mov" | "wmv" | "flv" | "webm" | "m4v" => Some("video"),
        "mp3" | "wav" | "flac" | "aac" | "ogg" | "wma" | "m4a" => Some("audio"),
        _ => None,
    }
}

/// UTC mtime in the canonical stored form. Microsecond precision keeps
/// change detection stable across filesystems.
pub fn format_mtime(t: SystemTime) -> String {
    DateTime::<Utc>::from(t).to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub errors: Vec<String>,
}

/// Walk `folder_path` and reconcile the index rows under `folder_id`.
/// `base_dir` is the data directory, used to drop thumbnails of vanished
/// files along with their rows.
pub fn scan_folder_blocking(
    db: &Db,
    folder_path: &str,
    folder_id: i64,
    base_dir: &Path,
) -> Result<ScanOutcome, DbError> {
    let mut outcome = ScanOutcome::default();
    let mut scanned: HashSet<String> = HashSet::new();

    for entry in WalkDir::new(folder_path) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                outcome.errors.push(format!("error accessing entry: {e}"));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let normalized = paths::normalize(&path.to_string_lossy());
        scanned.insert(normalized.clone());

        match scan_file(db, path, &normalized, folder_id) {
            Ok(FileChange::Added) => outcome.added += 1,
            Ok(FileChange::Updated) => outcome.updated += 1,
            Ok(FileChange::Unchanged) => {}
            Err(e) => outcome
                .errors
                .push(format!("error scanning {}: {e}", path.display())),
        }
    }

    outcome.removed = remove_deleted_files(db, folder_id, &scanned, base_dir)?;
    Ok(outcome)
}

enum FileChange {
    Added,
    Updated,
    Unchanged,
}

fn scan_file(
    db: &Db,
    path: &Path,
    normalized: &str,
    folder_id: i64,
) -> Result<FileChange, String> {
    let meta = std::fs::metadata(path).map_err(|e| e.to_string())?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let media_type = scan_media_type(&extension);
    let size = meta.len() as i64;
    let mtime = meta
        .modified()
        .map(format_mtime)
        .map_err(|e| e.to_string())?;

    let existing = db
        .query_row_blocking(
            "SELECT id, modified_at FROM files WHERE path = ?1",
            sql_params![normalized],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?)),
        )
        .map_err(|e| e.to_string())?;

    match existing {
        Some((id, stored_mtime)) => {
            if stored_mtime.as_deref() == Some(mtime.as_str()) {
                return Ok(FileChange::Unchanged);
            }
            db.write_blocking(
                "UPDATE files SET
                    filename = ?1,
                    extension = ?2,
                    mediatype = ?3,
                    size = ?4,
                    modified_at = ?5,
                    indexed_at = CURRENT_TIMESTAMP
                 WHERE id = ?6",
                sql_params![filename, extension, media_type, size, mtime, id],
            )
            .map_err(|e| e.to_string())?;
            Ok(FileChange::Updated)
        }
        None => {
            db.write_blocking(
                "INSERT INTO files (folder_id, path, filename, extension, mediatype, size, created_at, modified_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                sql_params![
                    folder_id,
                    normalized,
                    filename,
                    extension,
                    media_type,
                    size,
                    mtime.clone(),
                    mtime
                ],
            )
            .map_err(|e| e.to_string())?;
            Ok(FileChange::Added)
        }
    }
}

/// Delete rows whose paths were not seen by the walk, along with any cached
/// thumbnails they owned. Metadata rows go with them via foreign keys.
fn remove_deleted_files(
    db: &Db,
    folder_id: i64,
    scanned: &HashSet<String>,
    base_dir: &Path,
) -> Result<usize, DbError> {
    let rows = db.query_blocking(
        "SELECT id, path, thumbnail_small_path, thumbnail_large_path
         FROM files WHERE folder_id = ?1",
        sql_params![folder_id],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        },
    )?;

    let mut removed = 0;
    for (id, path, thumb_small, thumb_large) in rows {
        if scanned.contains(&path) {
            continue;
        }
        db.write_blocking("DELETE FROM files WHERE id = ?1", sql_params![id])?;
        for thumb in [thumb_small, thumb_large].into_iter().flatten() {
            let _ = crate::media::thumbnail::delete(Path::new(&thumb), base_dir);
        }
        removed += 1;
    }
    Ok(removed)
}

/// Upsert one file row during a refresh pass and report whether it is new.
/// Unlike [`scan_folder_blocking`], an existing row is refreshed
/// unconditionally since the extractors are about to run anyway.
pub fn upsert_file_blocking(
    db: &Db,
    folder_id: i64,
    path: &Path,
    size: i64,
    mtime: &str,
) -> Result<(i64, bool), DbError> {
    let normalized = paths::normalize(&path.to_string_lossy());
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let media_type = mime::kind_of_path(path).map(|k| k.as_str());

    let existing = db.query_row_blocking(
        "SELECT id FROM files WHERE path = ?1",
        sql_params![normalized.as_str()],
        |row| row.get::<_, i64>(0),
    )?;

    if let Some(id) = existing {
        db.write_blocking(
            "UPDATE files SET
                filename = ?1, extension = ?2, mediatype = ?3,
                size = ?4, modified_at = ?5, indexed_at = CURRENT_TIMESTAMP
             WHERE id = ?6",
            sql_params![filename, extension, media_type, size, mtime, id],
        )?;
        return Ok((id, false));
    }

    let result = db.write_blocking(
        "INSERT INTO files (folder_id, path, filename, extension, mediatype, size, created_at, modified_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        sql_params![folder_id, normalized, filename, extension, media_type, size, mtime, mtime],
    )?;
    Ok((result.last_insert_id, true))
}

pub fn update_file_thumbnails_blocking(
    db: &Db,
    file_id: i64,
    small: &str,
    large: &str,
) -> Result<(), DbError> {
    db.write_blocking(
        "UPDATE files SET thumbnail_small_path = ?1, thumbnail_large_path = ?2 WHERE id = ?3",
        sql_params![small, large, file_id],
    )?;
    Ok(())
}

pub fn update_file_hash_blocking(db: &Db, file_id: i64, xxhash: &str) -> Result<(), DbError> {
    db.write_blocking(
        "UPDATE files SET xxhash = ?1 WHERE id = ?2",
        sql_params![xxhash, file_id],
    )?;
    Ok(())
}

/// All registered root paths, ordered.
pub async fn monitored_folders(db: &Db) -> Result<Vec<String>, DbError> {
    db.query("SELECT path FROM folders ORDER BY path", sql_params![], |row| row.get(0))
        .await
}

/// Registered root containing `path`, preferring the longest match. Returns
/// the stored root path and its id.
pub fn find_parent_folder_blocking(db: &Db, path: &str) -> Result<Option<(String, i64)>, DbError> {
    let folders = db.query_blocking(
        "SELECT id, path FROM folders ORDER BY LENGTH(path) DESC",
        sql_params![],
        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
    )?;
    for (id, folder_path) in folders {
        if paths::within_root(path, &folder_path) {
            return Ok(Some((folder_path, id)));
        }
    }
    Ok(None)
}

// --- scan_queue bookkeeping -------------------------------------------------
// The persistent queue exists for out-of-process tooling; the in-memory
// refresh orchestrator stays authoritative at runtime.

pub fn queue_scan_blocking(db: &Db, path: &str) -> Result<(), DbError> {
    db.write_blocking(
        "INSERT OR REPLACE INTO scan_queue (path, requested_at, started_at, completed_at)
         VALUES (?1, CURRENT_TIMESTAMP, NULL, NULL)",
        sql_params![paths::normalize(path)],
    )?;
    Ok(())
}

pub fn pending_scans_blocking(db: &Db) -> Result<Vec<String>, DbError> {
    db.query_blocking(
        "SELECT path FROM scan_queue WHERE completed_at IS NULL ORDER BY requested_at",
        sql_params![],
        |row| row.get(0),
    )
}

pub fn mark_scan_started_blocking(db: &Db, path: &str) -> Result<(), DbError> {
    db.write_blocking(
        "UPDATE scan_queue SET started_at = CURRENT_TIMESTAMP WHERE path = ?1",
        sql_params![paths::normalize(path)],
    )?;
    Ok(())
}

pub fn mark_scan_completed_blocking(db: &Db, path: &str) -> Result<(), DbError> {
    db.write_blocking(
        "UPDATE scan_queue SET completed_at = CURRENT_TIMESTAMP WHERE path = ?1",
        sql_params![paths::normalize(path)],
    )?;
    Ok(())
}

pub fn remove_completed_scan_blocking(db: &Db, path: &str) -> Result<(), DbError> {
    db.write_blocking(
        "DELETE FROM scan_queue WHERE path = ?1",
        sql_params![paths::normalize(path)],
    )?;
    Ok(())
}

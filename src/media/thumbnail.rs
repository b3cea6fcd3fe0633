//! Content-addressed thumbnail cache.
//!
//! Derived files live at `<base>/thumbnails/<hh>/<hash64>_<size>.jpg` where
//! `hash64` is the XXH64 of the lowercased source path and `hh` its first two
//! hex digits (256-way sharding). Freshness is mtime-based per source, so a
//! hash collision merely invalidates the other source's thumbnail.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::ffmpeg::{FfmpegError, Manager};
use crate::media::{hash, mime};

pub const SMALL_SIZE: u32 = 500;
pub const LARGE_SIZE: u32 = 1800;
/// ffmpeg qscale:v, 2-5 is high quality (~85%).
pub const QUALITY: u32 = 3;
pub const THUMBNAIL_DIR: &str = "thumbnails";

#[derive(Debug, thiserror::Error)]
pub enum ThumbnailError {
    #[error("cannot stat source file: {0}")]
    SourceMissing(std::io::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Ffmpeg(#[from] FfmpegError),
}

/// Cache-relative path a source's thumbnail lives at, whether or not it has
/// been generated yet.
pub fn rel_path(source: &Path, size: u32) -> PathBuf {
    let key = hash::hash_string(&source.to_string_lossy().to_lowercase());
    let shard = &key[..2];
    PathBuf::from(THUMBNAIL_DIR)
        .join(shard)
        .join(format!("{key}_{size}.jpg"))
}

/// Materialize one thumbnail, returning its cache-relative path. Skips the
/// transcoder entirely when the cached file is newer than the source.
pub fn generate_blocking(
    source: &Path,
    base_dir: &Path,
    size: u32,
    ffmpeg: &Manager,
    token: &CancellationToken,
) -> Result<PathBuf, ThumbnailError> {
    let src_meta = std::fs::metadata(source).map_err(ThumbnailError::SourceMissing)?;

    let rel = rel_path(source, size);
    let full = base_dir.join(&rel);

    if let Ok(thumb_meta) = std::fs::metadata(&full) {
        if let (Ok(thumb_mtime), Ok(src_mtime)) = (thumb_meta.modified(), src_meta.modified()) {
            if thumb_mtime > src_mtime {
                return Ok(rel);
            }
        }
    }

    if let Some(parent) = full.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if mime::is_video_path(source) {
        // One representative frame: 10% in, clamped to [1s, 30s].
        let duration = ffmpeg
            .probe_blocking(source)
            .ok()
            .and_then(|p| p.duration_seconds())
            .unwrap_or(0.0);
        let timestamp = (duration * 0.10).clamp(1.0, 30.0);
        ffmpeg.extract_video_frame_blocking(source, &full, timestamp, size, QUALITY, token)?;
    } else {
        ffmpeg.generate_thumbnail_blocking(source, &full, size, QUALITY, token)?;
    }

    Ok(rel)
}

/// Generate the small and large thumbnails for one source.
pub fn generate_both_blocking(
    source: &Path,
    base_dir: &Path,
    ffmpeg: &Manager,
    token: &CancellationToken,
) -> Result<(PathBuf, PathBuf), ThumbnailError> {
    let small = generate_blocking(source, base_dir, SMALL_SIZE, ffmpeg, token)?;
    let large = generate_blocking(source, base_dir, LARGE_SIZE, ffmpeg, token)?;
    Ok((small, large))
}

/// Remove a cached thumbnail; missing files are not an error.
pub fn delete(rel: &Path, base_dir: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(base_dir.join(rel)) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

//! M3U playlist store.
//!
//! Playlists are plain files under the managed playlist directory (which is
//! itself registered as a root). Every mutation re-emits the file from
//! scratch; parse/emit are pure functions over the text.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::paths;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    pub path: String,
    pub title: String,
    /// Whole seconds; 0 when unknown.
    pub duration: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaylistInfo {
    pub name: String,
    pub path: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaylistMembership {
    pub name: String,
    pub path: String,
    pub contains: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum PlaylistError {
    #[error("playlist already exists")]
    AlreadyExists,
    #[error("playlist not found")]
    NotFound,
    #[error("invalid index")]
    InvalidIndex,
    #[error("path outside playlists directory")]
    OutsideDirectory,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub fn is_playlist_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some(ext) if ext.eq_ignore_ascii_case("m3u") || ext.eq_ignore_ascii_case("m3u8")
    )
}

/// Parse M3U text: `#EXTINF:<seconds>,<title>` lines annotate the following
/// bare path line; other `#` lines and blanks are ignored.
pub fn parse_m3u(text: &str) -> Vec<Song> {
    let mut songs = Vec::new();
    let mut current_title = String::new();
    let mut current_duration = 0i64;

    for line in text.lines() {
        let line = line.trim();
        if line.starts_with("#EXTM3U") {
            continue;
        }
        if let Some(info) = line.strip_prefix("#EXTINF:") {
            let (duration_part, title_part) = match info.split_once(',') {
                Some((d, t)) => (d, Some(t)),
                None => (info, None),
            };
            current_duration = duration_part.trim().parse().unwrap_or(0);
            if let Some(title) = title_part {
                current_title = title.trim().to_owned();
            }
            continue;
        }
        if line.starts_with('#') || line.is_empty() {
            continue;
        }

        let title = if current_title.is_empty() {
            basename(line)
        } else {
            current_title.clone()
        };
        songs.push(Song {
            path: line.to_owned(),
            title,
            duration: current_duration,
        });
        current_title.clear();
        current_duration = 0;
    }

    songs
}

/// Emit M3U text: header, then one `#EXTINF` line and one path line per song.
pub fn emit_m3u(songs: &[Song]) -> String {
    let mut out = String::from("#EXTM3U\n");
    for song in songs {
        out.push_str(&format!("#EXTINF:{},{}\n{}\n", song.duration, song.title, song.path));
    }
    out
}

fn basename(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_owned())
}

/// Replace filesystem-hostile characters and trim trailing dots/spaces.
/// An empty result becomes "Untitled".
pub fn sanitize_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            other => other,
        })
        .collect();
    let trimmed = replaced.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        "Untitled".to_owned()
    } else {
        trimmed.to_owned()
    }
}

#[derive(Debug, Clone)]
pub struct PlaylistStore {
    dir: PathBuf,
}

impl PlaylistStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        PlaylistStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reject any path that does not resolve inside the playlist directory.
    fn checked(&self, path: &str) -> Result<PathBuf, PlaylistError> {
        if !paths::within_root(path, &self.dir.to_string_lossy()) {
            return Err(PlaylistError::OutsideDirectory);
        }
        Ok(PathBuf::from(path))
    }

    pub fn list(&self) -> Result<Vec<PlaylistInfo>, PlaylistError> {
        let mut playlists = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() || !is_playlist_file(&path) {
                continue;
            }
            let songs = self.read_file(&path)?;
            playlists.push(PlaylistInfo {
                name: stem_of(&path),
                path: path.to_string_lossy().into_owned(),
                count: songs.len(),
            });
        }
        playlists.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(playlists)
    }

    pub fn read(&self, path: &str) -> Result<(String, Vec<Song>), PlaylistError> {
        let path = self.checked(path)?;
        let songs = self.read_file(&path)?;
        Ok((stem_of(&path), songs))
    }

    /// Create an empty playlist from a display name. Refuses to clobber.
    pub fn create(&self, name: &str) -> Result<(String, PathBuf), PlaylistError> {
        let sanitized = sanitize_name(name);
        let path = self.dir.join(format!("{sanitized}.m3u8"));
        if path.exists() {
            return Err(PlaylistError::AlreadyExists);
        }
        std::fs::write(&path, emit_m3u(&[]))?;
        Ok((sanitized, path))
    }

    pub fn delete(&self, path: &str) -> Result<(), PlaylistError> {
        let path = self.checked(path)?;
        std::fs::remove_file(&path).map_err(|_| PlaylistError::NotFound)
    }

    /// Append a song unless its normalized path is already present. Returns
    /// true when the song was already there (and nothing was written).
    pub fn add(
        &self,
        playlist: &str,
        song: &str,
        title: Option<&str>,
        duration: i64,
    ) -> Result<bool, PlaylistError> {
        let path = self.checked(playlist)?;
        let mut songs = self.read_file(&path)?;

        let normalized = paths::normalize(song);
        if songs.iter().any(|s| paths::normalize(&s.path) == normalized) {
            return Ok(true);
        }

        let title = match title {
            Some(t) if !t.is_empty() => t.to_owned(),
            _ => basename(song),
        };
        songs.push(Song {
            path: song.to_owned(),
            title,
            duration,
        });
        std::fs::write(&path, emit_m3u(&songs))?;
        Ok(false)
    }

    pub fn remove(&self, playlist: &str, index: usize) -> Result<(), PlaylistError> {
        let path = self.checked(playlist)?;
        let mut songs = self.read_file(&path)?;
        if index >= songs.len() {
            return Err(PlaylistError::InvalidIndex);
        }
        songs.remove(index);
        std::fs::write(&path, emit_m3u(&songs))?;
        Ok(())
    }

    /// Move the song at `from` to sit before whatever occupied `to`:
    /// remove, then insert, shifting the target left by one when the removal
    /// happened in front of it.
    pub fn reorder(&self, playlist: &str, from: usize, to: usize) -> Result<(), PlaylistError> {
        let path = self.checked(playlist)?;
        let mut songs = self.read_file(&path)?;
        if from >= songs.len() || to >= songs.len() {
            return Err(PlaylistError::InvalidIndex);
        }
        let song = songs.remove(from);
        let target = if to > from { to - 1 } else { to };
        songs.insert(target, song);
        std::fs::write(&path, emit_m3u(&songs))?;
        Ok(())
    }

    /// For every playlist, whether it contains `song` by normalized path.
    pub fn check(&self, song: &str) -> Result<Vec<PlaylistMembership>, PlaylistError> {
        let normalized = paths::normalize(song);
        let mut result = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() || !is_playlist_file(&path) {
                continue;
            }
            let Ok(songs) = self.read_file(&path) else { continue };
            result.push(PlaylistMembership {
                name: stem_of(&path),
                path: path.to_string_lossy().into_owned(),
                contains: songs.iter().any(|s| paths::normalize(&s.path) == normalized),
            });
        }
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    fn read_file(&self, path: &Path) -> Result<Vec<Song>, PlaylistError> {
        let text = std::fs::read_to_string(path).map_err(|_| PlaylistError::NotFound)?;
        Ok(parse_m3u(&text))
    }
}

fn stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

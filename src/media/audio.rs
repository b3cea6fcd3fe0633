//! Audio tag extraction.
//!
//! Extraction is loss-tolerant by contract: a corrupt or tagless file yields
//! an all-null record, never an error, so one bad file cannot fail the
//! surrounding refresh pass.

use std::path::Path;

use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey};
use symphonia::core::probe::Hint;

use crate::db::{Db, DbError};
use crate::sql_params;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioMetadata {
    pub artist: Option<String>,
    pub album: Option<String>,
    pub title: Option<String>,
    pub genre: Option<String>,
    pub track_number: Option<i64>,
    pub year: Option<i64>,
    pub duration_seconds: Option<i64>,
    pub bitrate: Option<i64>,
}

/// Read tags and duration from an audio file. Never fails: anything the
/// probe cannot make sense of comes back as an empty record.
pub fn extract(path: &Path) -> AudioMetadata {
    let mut meta = AudioMetadata::default();

    let Ok(file) = std::fs::File::open(path) else {
        return meta;
    };
    let file_size = file.metadata().map(|m| m.len()).unwrap_or(0);
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let mut probed = match symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    ) {
        Ok(p) => p,
        Err(e) => {
            tracing::debug!("audio probe failed for {}: {e}", path.display());
            return meta;
        }
    };

    // Tags found while probing (ID3 blocks sit in front of the container).
    if let Some(mut m) = probed.metadata.get() {
        if let Some(rev) = m.skip_to_latest() {
            apply_revision(rev, &mut meta);
        }
    }
    // Tags carried by the container itself.
    {
        let mut m = probed.format.metadata();
        if let Some(rev) = m.skip_to_latest() {
            apply_revision(rev, &mut meta);
        }
    }

    if let Some(track) = probed.format.default_track() {
        let cp = &track.codec_params;
        if let (Some(tb), Some(n_frames)) = (cp.time_base, cp.n_frames) {
            let t = tb.calc_time(n_frames);
            let secs = t.seconds as f64 + t.frac;
            if secs > 0.0 {
                meta.duration_seconds = Some(secs.round() as i64);
                // Average container bitrate in bits per second.
                meta.bitrate = Some(((file_size as f64 * 8.0) / secs).round() as i64);
            }
        }
    }

    meta
}

fn apply_revision(rev: &MetadataRevision, meta: &mut AudioMetadata) {
    for tag in rev.tags() {
        let Some(key) = tag.std_key else { continue };
        let value = tag.value.to_string();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            continue;
        }
        match key {
            StandardTagKey::Artist => meta.artist = Some(trimmed.to_owned()),
            StandardTagKey::Album => meta.album = Some(trimmed.to_owned()),
            StandardTagKey::TrackTitle => meta.title = Some(trimmed.to_owned()),
            StandardTagKey::Genre => meta.genre = Some(trimmed.to_owned()),
            StandardTagKey::TrackNumber => {
                // Accept both "5" and "5/12".
                let n: i64 = trimmed
                    .chars()
                    .take_while(|c| c.is_ascii_digit())
                    .collect::<String>()
                    .parse()
                    .unwrap_or(0);
                if n > 0 {
                    meta.track_number = Some(n);
                }
            }
            StandardTagKey::Date | StandardTagKey::ReleaseDate => {
                if let Some(year) = leading_year(trimmed) {
                    meta.year = Some(year);
                }
            }
            _ => {}
        }
    }
}

/// First run of four ASCII digits, as a year.
fn leading_year(s: &str) -> Option<i64> {
    let bytes = s.as_bytes();
    for start in 0..bytes.len() {
        if bytes[start..].len() >= 4 && bytes[start..start + 4].iter().all(u8::is_ascii_digit) {
            return s[start..start + 4].parse().ok();
        }
    }
    None
}

/// Persist one row of audio metadata. Idempotent: silently skips when a row
/// for `file_id` already exists.
pub fn save_blocking(db: &Db, file_id: i64, meta: &AudioMetadata) -> Result<(), DbError> {
    let existing = db.query_row_blocking(
        "SELECT id FROM audio_metadata WHERE file_id = ?1",
        sql_params![file_id],
        |row| row.get::<_, i64>(0),
    )?;
    if existing.is_some() {
        return Ok(());
    }

    db.write_blocking(
        "INSERT INTO audio_metadata (
            file_id, artist, album, title, genre,
            track_number, year, duration_seconds, bitrate
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        sql_params![
            file_id,
            meta.artist.clone(),
            meta.album.clone(),
            meta.title.clone(),
            meta.genre.clone(),
            meta.track_number,
            meta.year,
            meta.duration_seconds,
            meta.bitrate,
        ],
    )?;
    Ok(())
}

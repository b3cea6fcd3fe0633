//! EXIF extraction for images.
//!
//! Same loss-tolerance contract as the audio extractor: a missing or corrupt
//! EXIF block yields an all-null record, never an error.

use std::io::BufReader;
use std::path::Path;

use exif::{Exif, In, Tag, Value};

use crate::db::{Db, DbError};
use crate::sql_params;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageMetadata {
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    /// ISO 8601 local timestamp, e.g. "2024-06-01T14:30:00".
    pub date_taken: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub orientation: Option<i64>,
    pub iso: Option<i64>,
    /// "1/250" below one second, decimal seconds at or above it.
    pub exposure_time: Option<String>,
    pub f_number: Option<f64>,
    pub focal_length: Option<f64>,
    pub gps_latitude: Option<f64>,
    pub gps_longitude: Option<f64>,
}

/// Read EXIF metadata from an image file. Never fails.
pub fn extract(path: &Path) -> ImageMetadata {
    let mut meta = ImageMetadata::default();

    let Ok(file) = std::fs::File::open(path) else {
        return meta;
    };
    let mut reader = BufReader::new(file);
    let exif = match exif::Reader::new().read_from_container(&mut reader) {
        Ok(e) => e,
        Err(e) => {
            tracing::debug!("no EXIF data in {}: {e}", path.display());
            return meta;
        }
    };

    meta.camera_make = ascii_field(&exif, Tag::Make);
    meta.camera_model = ascii_field(&exif, Tag::Model);
    meta.date_taken = date_taken(&exif);
    meta.width = uint_field(&exif, Tag::PixelXDimension);
    meta.height = uint_field(&exif, Tag::PixelYDimension);
    meta.orientation = uint_field(&exif, Tag::Orientation);
    meta.iso = uint_field(&exif, Tag::PhotographicSensitivity);

    if let Some((num, denom)) = rational_field(&exif, Tag::ExposureTime) {
        if denom != 0 {
            meta.exposure_time = Some(format_exposure(num, denom));
        }
    }
    if let Some((num, denom)) = rational_field(&exif, Tag::FNumber) {
        if denom != 0 {
            meta.f_number = Some(num as f64 / denom as f64);
        }
    }
    if let Some((num, denom)) = rational_field(&exif, Tag::FocalLength) {
        if denom != 0 {
            meta.focal_length = Some(num as f64 / denom as f64);
        }
    }

    // Latitude and longitude are only meaningful as a pair.
    if let (Some(lat), Some(lon)) = (
        gps_coordinate(&exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, "S"),
        gps_coordinate(&exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, "W"),
    ) {
        meta.gps_latitude = Some(lat);
        meta.gps_longitude = Some(lon);
    }

    meta
}

fn ascii_field(exif: &Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    if let Value::Ascii(ref parts) = field.value {
        let raw = parts.first()?;
        let text = String::from_utf8_lossy(raw).trim().to_owned();
        if !text.is_empty() {
            return Some(text);
        }
    }
    None
}

fn uint_field(exif: &Exif, tag: Tag) -> Option<i64> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    field.value.get_uint(0).map(i64::from)
}

fn rational_field(exif: &Exif, tag: Tag) -> Option<(u64, u64)> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    if let Value::Rational(ref v) = field.value {
        let r = v.first()?;
        return Some((u64::from(r.num), u64::from(r.denom)));
    }
    None
}

fn date_taken(exif: &Exif) -> Option<String> {
    let raw = ascii_field(exif, Tag::DateTimeOriginal)
        .or_else(|| ascii_field(exif, Tag::DateTime))?;
    // EXIF timestamps look like "2024:06:01 14:30:00".
    let parsed = chrono::NaiveDateTime::parse_from_str(&raw, "%Y:%m:%d %H:%M:%S").ok()?;
    Some(parsed.format("%Y-%m-%dT%H:%M:%S").to_string())
}

/// Exposure below one second becomes a simplified fraction ("1/250"); at or
/// above one second, decimal seconds.
fn format_exposure(num: u64, denom: u64) -> String {
    if num >= denom {
        let secs = num as f64 / denom as f64;
        if secs == secs.trunc() {
            format!("{}", secs as u64)
        } else {
            format!("{secs:.2}")
        }
    } else {
        let g = gcd(num, denom);
        format!("{}/{}", num / g, denom / g)
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.max(1)
}

/// Degrees/minutes/seconds to signed decimal degrees.
fn gps_coordinate(exif: &Exif, tag: Tag, ref_tag: Tag, negative_ref: &str) -> Option<f64> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    let Value::Rational(ref dms) = field.value else {
        return None;
    };
    if dms.len() < 3 || dms.iter().take(3).any(|r| r.denom == 0) {
        return None;
    }
    let degrees = dms[0].to_f64() + dms[1].to_f64() / 60.0 + dms[2].to_f64() / 3600.0;

    let reference = ascii_field(exif, ref_tag).unwrap_or_default();
    if reference.eq_ignore_ascii_case(negative_ref) {
        Some(-degrees)
    } else {
        Some(degrees)
    }
}

/// Persist one row of image metadata. Idempotent on `file_id`.
pub fn save_blocking(db: &Db, file_id: i64, meta: &ImageMetadata) -> Result<(), DbError> {
    let existing = db.query_row_blocking(
        "SELECT id FROM image_metadata WHERE file_id = ?1",
        sql_params![file_id],
        |row| row.get::<_, i64>(0),
    )?;
    if existing.is_some() {
        return Ok(());
    }

    db.write_blocking(
        "INSERT INTO image_metadata (
            file_id, camera_make, camera_model, date_taken,
            width, height, orientation, iso,
            exposure_time, f_number, focal_length,
            gps_latitude, gps_longitude
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        sql_params![
            file_id,
            meta.camera_make.clone(),
            meta.camera_model.clone(),
            meta.date_taken.clone(),
            meta.width,
            meta.height,
            meta.orientation,
            meta.iso,
            meta.exposure_time.clone(),
            meta.f_number,
            meta.focal_length,
            meta.gps_latitude,
            meta.gps_longitude,
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::format_exposure;

    #[test]
    fn sub_second_exposure_is_a_simplified_fraction() {
        assert_eq!(format_exposure(1, 250), "1/250");
        assert_eq!(format_exposure(10, 2500), "1/250");
        assert_eq!(format_exposure(2, 3), "2/3");
    }

    #[test]
    fn long_exposure_is_decimal_seconds() {
        assert_eq!(format_exposure(2, 1), "2");
        assert_eq!(format_exposure(5, 2), "2.50");
    }
}

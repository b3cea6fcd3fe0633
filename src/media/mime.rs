use std::path::Path;

/// Media families the serving layer distinguishes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

fn ext_of(path: &Path) -> Option<String> {
    Some(path.extension()?.to_str()?.to_ascii_lowercase())
}

/// Content type for an audio extension (without the leading dot).
/// The `*_path` helpers match extensions case-insensitively.
pub fn audio_content_type(ext: &str) -> Option<&'static str> {
    Some(match ext {
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "aac" => "audio/aac",
        "ogg" => "audio/ogg",
        "wma" => "audio/x-ms-wma",
        "m4a" => "audio/mp4",
        _ => return None,
    })
}

pub fn image_content_type(ext: &str) -> Option<&'static str> {
    Some(match ext {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        _ => return None,
    })
}

pub fn video_content_type(ext: &str) -> Option<&'static str> {
    Some(match ext {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "ogv" => "video/ogg",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "mkv" => "video/x-matroska",
        _ => return None,
    })
}

pub fn is_audio_path(path: &Path) -> bool {
    ext_of(path).is_some_and(|e| audio_content_type(&e).is_some())
}

pub fn is_image_path(path: &Path) -> bool {
    ext_of(path).is_some_and(|e| image_content_type(&e).is_some())
}

pub fn is_video_path(path: &Path) -> bool {
    ext_of(path).is_some_and(|e| video_content_type(&e).is_some())
}

/// Family a path is served as, if its extension belongs to any.
pub fn kind_of_path(path: &Path) -> Option<MediaKind> {
    if is_image_path(path) {
        Some(MediaKind::Image)
    } else if is_audio_path(path) {
        Some(MediaKind::Audio)
    } else if is_video_path(path) {
        Some(MediaKind::Video)
    } else {
        None
    }
}

/// True when a refresh pass should touch this file at all.
pub fn is_media_path(path: &Path) -> bool {
    kind_of_path(path).is_some()
}

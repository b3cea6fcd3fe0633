use std::path::Path;

use q2::ffmpeg::{Manager, ProbeResult, StreamInfo};
use q2::media::{audio, exif, hash, mime, thumbnail};
use tokio_util::sync::CancellationToken;

fn probe_with_audio(codec: &str) -> ProbeResult {
    ProbeResult {
        streams: vec![
            StreamInfo {
                index: 0,
                codec_name: "h264".into(),
                codec_type: "video".into(),
                channels: None,
            },
            StreamInfo {
                index: 1,
                codec_name: codec.into(),
                codec_type: "audio".into(),
                channels: Some(2),
            },
        ],
        ..ProbeResult::default()
    }
}

#[test]
fn transcode_needed_only_for_incompatible_audio_codecs() {
    for compatible in ["aac", "mp3", "opus", "flac", "AAC"] {
        assert!(
            !probe_with_audio(compatible).needs_transcoding(),
            "{compatible} should not need transcoding"
        );
    }
    for incompatible in ["ac3", "eac3", "dts", "truehd", "vorbis"] {
        assert!(
            probe_with_audio(incompatible).needs_transcoding(),
            "{incompatible} should need transcoding"
        );
    }
}

#[test]
fn no_audio_stream_means_no_transcoding() {
    let video_only = ProbeResult {
        streams: vec![StreamInfo {
            index: 0,
            codec_name: "h264".into(),
            codec_type: "video".into(),
            channels: None,
        }],
        ..ProbeResult::default()
    };
    assert!(!video_only.needs_transcoding());
    assert!(!ProbeResult::default().needs_transcoding());
}

#[test]
fn only_the_first_audio_stream_decides() {
    let mut probe = probe_with_audio("ac3");
    probe.streams.push(StreamInfo {
        index: 2,
        codec_name: "aac".into(),
        codec_type: "audio".into(),
        channels: Some(2),
    });
    assert!(probe.needs_transcoding());
}

#[test]
fn hash_string_matches_known_xxh64_vector() {
    assert_eq!(hash::hash_string(""), "ef46db3751d8e999");
    assert_eq!(hash::hash_string("").len(), 16);
}

#[test]
fn hash_file_agrees_with_hash_string() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("blob.bin");
    std::fs::write(&path, b"some media bytes").unwrap();
    assert_eq!(
        hash::hash_file(&path).expect("hash file"),
        hash::hash_string("some media bytes")
    );
}

#[test]
fn thumbnail_paths_are_sharded_and_case_insensitive() {
    let a = thumbnail::rel_path(Path::new("/photos/IMG_001.jpg"), thumbnail::SMALL_SIZE);
    let b = thumbnail::rel_path(Path::new("/photos/img_001.jpg"), thumbnail::SMALL_SIZE);
    assert_eq!(a, b);

    let name = a.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.ends_with("_500.jpg"));
    let shard = a
        .parent()
        .and_then(|p| p.file_name())
        .unwrap()
        .to_string_lossy()
        .into_owned();
    assert_eq!(shard.len(), 2);
    assert!(name.starts_with(&shard));
    assert_eq!(a.components().next().unwrap().as_os_str(), "thumbnails");
}

#[test]
fn sizes_key_distinct_cache_entries() {
    let small = thumbnail::rel_path(Path::new("/p/a.jpg"), thumbnail::SMALL_SIZE);
    let large = thumbnail::rel_path(Path::new("/p/a.jpg"), thumbnail::LARGE_SIZE);
    assert_ne!(small, large);
}

#[test]
fn fresh_thumbnail_short_circuits_generation() {
    let base = tempfile::tempdir().expect("tempdir");
    let src_dir = tempfile::tempdir().expect("tempdir");

    let src = src_dir.path().join("photo.jpg");
    std::fs::write(&src, b"not a real jpeg").unwrap();

    // Pre-populate the cache entry; its mtime postdates the source.
    std::thread::sleep(std::time::Duration::from_millis(50));
    let rel = thumbnail::rel_path(&src, thumbnail::SMALL_SIZE);
    let full = base.path().join(&rel);
    std::fs::create_dir_all(full.parent().unwrap()).unwrap();
    std::fs::write(&full, b"cached thumbnail bytes").unwrap();

    let ffmpeg = Manager::new(base.path().join("bin"));
    let token = CancellationToken::new();
    let out = thumbnail::generate_blocking(&src, base.path(), thumbnail::SMALL_SIZE, &ffmpeg, &token)
        .expect("fresh thumbnail is returned as-is");
    assert_eq!(out, rel);
    // The cached bytes were not touched, so the transcoder never ran.
    assert_eq!(std::fs::read(&full).unwrap(), b"cached thumbnail bytes");
}

#[test]
fn missing_source_fails_thumbnail_generation() {
    let base = tempfile::tempdir().expect("tempdir");
    let ffmpeg = Manager::new(base.path().join("bin"));
    let token = CancellationToken::new();
    let result = thumbnail::generate_blocking(
        Path::new("/nonexistent/file.jpg"),
        base.path(),
        thumbnail::SMALL_SIZE,
        &ffmpeg,
        &token,
    );
    assert!(result.is_err());
}

#[test]
fn audio_extraction_never_errors_on_garbage() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("broken.mp3");
    std::fs::write(&path, b"\x00\x01\x02 this is not an mp3").unwrap();
    let meta = audio::extract(&path);
    assert_eq!(meta, audio::AudioMetadata::default());
}

#[test]
fn exif_extraction_never_errors_on_garbage() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("broken.jpg");
    std::fs::write(&path, b"\xff\xd8 truncated jpeg").unwrap();
    let meta = exif::extract(&path);
    assert_eq!(meta, exif::ImageMetadata::default());
}

#[test]
fn extension_tables_classify_paths() {
    assert!(mime::is_audio_path(Path::new("/m/a.MP3")));
    assert!(mime::is_image_path(Path::new("/m/b.png")));
    assert!(mime::is_video_path(Path::new("/m/c.mkv")));
    assert!(!mime::is_media_path(Path::new("/m/d.txt")));
    assert_eq!(mime::audio_content_type("flac"), Some("audio/flac"));
    assert_eq!(mime::video_content_type("m4v"), Some("video/mp4"));
    assert_eq!(mime::image_content_type("jpeg"), Some("image/jpeg"));
}

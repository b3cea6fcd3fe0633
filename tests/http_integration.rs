mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use q2::cast::CastManager;
use q2::config::Layout;
use q2::db::Db;
use q2::ffmpeg::Manager;
use q2::http::{build_router, state::AppState};
use q2::playlist::PlaylistStore;
use q2::refresh::RefreshQueue;

fn make_state(data_dir: &std::path::Path, db: Arc<Db>) -> AppState {
    let layout = Layout::new(data_dir);
    let playlists_dir = layout.playlists_dir();
    std::fs::create_dir_all(&playlists_dir).expect("playlists dir");
    let ffmpeg = Arc::new(Manager::new(layout.bin_dir()));
    AppState {
        db: Arc::clone(&db),
        layout: layout.clone(),
        ffmpeg: Arc::clone(&ffmpeg),
        refresh: Arc::new(RefreshQueue::new(db, layout, ffmpeg)),
        cast: Arc::new(CastManager::new("")),
        playlists: PlaylistStore::new(playlists_dir),
    }
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.expect("body").to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).expect("request")
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

#[tokio::test(flavor = "multi_thread")]
async fn roots_lists_registered_folders() {
    let data_dir = tempfile::tempdir().expect("tempdir");
    let db = common::open_db(data_dir.path()).await;
    common::register_folder(&db, "/music").await;
    let app = build_router(make_state(data_dir.path(), db));

    let response = app.oneshot(get("/api/roots")).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["roots"][0]["path"], "/music");
    assert_eq!(json["roots"][0]["name"], "music");
}

#[tokio::test(flavor = "multi_thread")]
async fn wrong_method_yields_405_json() {
    let data_dir = tempfile::tempdir().expect("tempdir");
    let db = common::open_db(data_dir.path()).await;
    let app = build_router(make_state(data_dir.path(), db));

    let response = app
        .oneshot(post_json("/api/roots", serde_json::json!({})))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    let json = body_json(response).await;
    assert_eq!(json["error"], "method not allowed");
}

#[tokio::test(flavor = "multi_thread")]
async fn browse_outside_roots_is_forbidden() {
    let data_dir = tempfile::tempdir().expect("tempdir");
    let db = common::open_db(data_dir.path()).await;
    common::register_folder(&db, "/music").await;
    let app = build_router(make_state(data_dir.path(), db));

    let response = app
        .oneshot(get("/api/browse?path=/outside"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let json = body_json(response).await;
    assert_eq!(json["error"], "path not within monitored folders");
}

#[tokio::test(flavor = "multi_thread")]
async fn sibling_prefix_of_a_root_is_still_forbidden() {
    let data_dir = tempfile::tempdir().expect("tempdir");
    let media_dir = tempfile::tempdir().expect("tempdir");
    let db = common::open_db(data_dir.path()).await;
    let root = media_dir.path().to_string_lossy().into_owned();
    common::register_folder(&db, &root).await;
    let app = build_router(make_state(data_dir.path(), db));

    let sibling = format!("{root}2");
    let response = app
        .oneshot(get(&format!(
            "/api/browse?path={}",
            urlencoding::encode(&sibling)
        )))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test(flavor = "multi_thread")]
async fn browse_lists_directory_entries() {
    let data_dir = tempfile::tempdir().expect("tempdir");
    let media_dir = tempfile::tempdir().expect("tempdir");
    let db = common::open_db(data_dir.path()).await;
    let root = media_dir.path().to_string_lossy().into_owned();
    common::register_folder(&db, &root).await;

    std::fs::write(media_dir.path().join("a.mp3"), b"x").unwrap();
    std::fs::write(media_dir.path().join("b.png"), b"x").unwrap();
    std::fs::create_dir(media_dir.path().join("sub")).unwrap();

    let app = build_router(make_state(data_dir.path(), db));
    let response = app
        .oneshot(get(&format!(
            "/api/browse?path={}&metadata=true",
            urlencoding::encode(&root)
        )))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert!(json["parent"].is_null(), "a root has no parent");
    let entries = json["entries"].as_array().expect("entries");
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0]["name"], "a.mp3");
    assert_eq!(entries[0]["type"], "file");
    assert_eq!(entries[0]["mediaType"], "audio");
    assert_eq!(entries[1]["mediaType"], "image");
    assert_eq!(entries[2]["name"], "sub");
    assert_eq!(entries[2]["type"], "dir");
}

#[tokio::test(flavor = "multi_thread")]
async fn stream_rejects_non_audio_files() {
    let data_dir = tempfile::tempdir().expect("tempdir");
    let media_dir = tempfile::tempdir().expect("tempdir");
    let db = common::open_db(data_dir.path()).await;
    let root = media_dir.path().to_string_lossy().into_owned();
    common::register_folder(&db, &root).await;
    std::fs::write(media_dir.path().join("c.txt"), b"text").unwrap();

    let app = build_router(make_state(data_dir.path(), db));
    let target = media_dir.path().join("c.txt");
    let response = app
        .oneshot(get(&format!(
            "/api/stream?path={}",
            urlencoding::encode(&target.to_string_lossy())
        )))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread")]
async fn stream_serves_byte_ranges() {
    let data_dir = tempfile::tempdir().expect("tempdir");
    let media_dir = tempfile::tempdir().expect("tempdir");
    let db = common::open_db(data_dir.path()).await;
    let root = media_dir.path().to_string_lossy().into_owned();
    common::register_folder(&db, &root).await;
    std::fs::write(media_dir.path().join("a.mp3"), b"0123456789").unwrap();

    let app = build_router(make_state(data_dir.path(), db));
    let target = media_dir.path().join("a.mp3");
    let uri = format!(
        "/api/stream?path={}",
        urlencoding::encode(&target.to_string_lossy())
    );

    let full = app
        .clone()
        .oneshot(get(&uri))
        .await
        .expect("response");
    assert_eq!(full.status(), StatusCode::OK);
    assert_eq!(full.headers()[header::CONTENT_TYPE], "audio/mpeg");
    assert_eq!(full.headers()[header::ACCEPT_RANGES], "bytes");
    assert!(full.headers().contains_key(header::LAST_MODIFIED));

    let ranged_request = Request::builder()
        .uri(&uri)
        .header(header::RANGE, "bytes=2-5")
        .body(Body::empty())
        .expect("request");
    let ranged = app.oneshot(ranged_request).await.expect("response");
    assert_eq!(ranged.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(ranged.headers()[header::CONTENT_RANGE], "bytes 2-5/10");
    let bytes = ranged.into_body().collect().await.expect("body").to_bytes();
    assert_eq!(&bytes[..], b"2345");
}

#[tokio::test(flavor = "multi_thread")]
async fn uncached_thumbnail_is_404() {
    let data_dir = tempfile::tempdir().expect("tempdir");
    let media_dir = tempfile::tempdir().expect("tempdir");
    let db = common::open_db(data_dir.path()).await;
    let root = media_dir.path().to_string_lossy().into_owned();
    common::register_folder(&db, &root).await;
    std::fs::write(media_dir.path().join("b.png"), b"x").unwrap();

    let app = build_router(make_state(data_dir.path(), db));
    let target = media_dir.path().join("b.png");
    let response = app
        .oneshot(get(&format!(
            "/api/thumbnail?path={}&size=small",
            urlencoding::encode(&target.to_string_lossy())
        )))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn metadata_status_starts_idle() {
    let data_dir = tempfile::tempdir().expect("tempdir");
    let db = common::open_db(data_dir.path()).await;
    let app = build_router(make_state(data_dir.path(), db));

    let response = app.oneshot(get("/api/metadata/status")).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["scanning"], false);
    assert_eq!(json["files_total"], 0);
    assert_eq!(json["queue_length"], 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn refresh_of_unregistered_path_is_forbidden() {
    let data_dir = tempfile::tempdir().expect("tempdir");
    let db = common::open_db(data_dir.path()).await;
    let app = build_router(make_state(data_dir.path(), db));

    let response = app
        .oneshot(post_json(
            "/api/metadata/refresh",
            serde_json::json!({"path": "/outside"}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_remove_of_absent_path_is_404() {
    let data_dir = tempfile::tempdir().expect("tempdir");
    let db = common::open_db(data_dir.path()).await;
    let app = build_router(make_state(data_dir.path(), db));

    let request = Request::builder()
        .method("DELETE")
        .uri("/api/metadata/queue?path=/never-queued")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn playlist_crud_round_trip() {
    let data_dir = tempfile::tempdir().expect("tempdir");
    let db = common::open_db(data_dir.path()).await;
    let app = build_router(make_state(data_dir.path(), db));

    // Create.
    let created = app
        .clone()
        .oneshot(post_json("/api/playlist", serde_json::json!({"name": "Mix"})))
        .await
        .expect("response");
    assert_eq!(created.status(), StatusCode::OK);
    let created = body_json(created).await;
    let playlist_path = created["path"].as_str().expect("path").to_owned();

    // Duplicate name conflicts.
    let duplicate = app
        .clone()
        .oneshot(post_json("/api/playlist", serde_json::json!({"name": "Mix"})))
        .await
        .expect("response");
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    // Add a song, then the same song again.
    let add = app
        .clone()
        .oneshot(post_json(
            "/api/playlist/add",
            serde_json::json!({"playlist": playlist_path, "song": "/m/a.mp3", "title": "A", "duration": 60}),
        ))
        .await
        .expect("response");
    assert_eq!(add.status(), StatusCode::OK);
    assert_eq!(body_json(add).await["already_exists"], false);

    let again = app
        .clone()
        .oneshot(post_json(
            "/api/playlist/add",
            serde_json::json!({"playlist": playlist_path, "song": "/m/a.mp3"}),
        ))
        .await
        .expect("response");
    assert_eq!(body_json(again).await["already_exists"], true);

    // Read it back.
    let read = app
        .clone()
        .oneshot(get(&format!(
            "/api/playlist?path={}",
            urlencoding::encode(&playlist_path)
        )))
        .await
        .expect("response");
    assert_eq!(read.status(), StatusCode::OK);
    let read = body_json(read).await;
    assert_eq!(read["name"], "Mix");
    assert_eq!(read["songs"].as_array().map(Vec::len), Some(1));

    // Listing shows the count.
    let listing = app
        .clone()
        .oneshot(get("/api/playlists"))
        .await
        .expect("response");
    let listing = body_json(listing).await;
    assert_eq!(listing["playlists"][0]["count"], 1);

    // Delete.
    let delete = Request::builder()
        .method("DELETE")
        .uri(format!(
            "/api/playlist?path={}",
            urlencoding::encode(&playlist_path)
        ))
        .body(Body::empty())
        .expect("request");
    let deleted = app.clone().oneshot(delete).await.expect("response");
    assert_eq!(deleted.status(), StatusCode::OK);

    let empty = app.oneshot(get("/api/playlists")).await.expect("response");
    let empty = body_json(empty).await;
    assert_eq!(empty["playlists"].as_array().map(Vec::len), Some(0));
}

#[tokio::test(flavor = "multi_thread")]
async fn cast_status_defaults_to_disconnected() {
    let data_dir = tempfile::tempdir().expect("tempdir");
    let db = common::open_db(data_dir.path()).await;
    let app = build_router(make_state(data_dir.path(), db));

    let response = app.oneshot(get("/api/cast/status")).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["connected"], false);
}

#[tokio::test(flavor = "multi_thread")]
async fn video_without_probe_support_serves_directly() {
    let data_dir = tempfile::tempdir().expect("tempdir");
    let media_dir = tempfile::tempdir().expect("tempdir");
    let db = common::open_db(data_dir.path()).await;
    let root = media_dir.path().to_string_lossy().into_owned();
    common::register_folder(&db, &root).await;
    std::fs::write(media_dir.path().join("clip.mp4"), b"not a real mp4").unwrap();

    let app = build_router(make_state(data_dir.path(), db));
    let target = media_dir.path().join("clip.mp4");
    let response = app
        .oneshot(get(&format!(
            "/api/video?path={}",
            urlencoding::encode(&target.to_string_lossy())
        )))
        .await
        .expect("response");

    // The probe fails on garbage (or a missing ffmpeg), so the bytes are
    // served directly with the native content type and range support.
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
    assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
}

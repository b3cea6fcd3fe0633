mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use q2::config::Layout;
use q2::db::Db;
use q2::ffmpeg::Manager;
use q2::refresh::{RefreshQueue, StartOutcome};
use q2::sql_params;

fn make_queue(db: Arc<Db>, layout: Layout) -> Arc<RefreshQueue> {
    let ffmpeg = Arc::new(Manager::new(layout.bin_dir()));
    Arc::new(RefreshQueue::new(db, layout, ffmpeg))
}

#[tokio::test(flavor = "multi_thread")]
async fn idle_queue_reports_nothing_running() {
    let data_dir = tempfile::tempdir().expect("tempdir");
    let db = common::open_db(data_dir.path()).await;
    let queue = make_queue(db, Layout::new(data_dir.path()));

    let status = queue.status();
    assert!(!status.scanning);
    assert_eq!(status.files_total, 0);
    assert_eq!(status.files_done, 0);
    assert_eq!(status.queue_length, 0);

    assert!(!queue.cancel());
    assert!(!queue.remove_from_queue("/nowhere"));
    assert!(!queue.prioritize("/nowhere"));
}

#[tokio::test(flavor = "multi_thread")]
async fn refresh_worker_indexes_and_extracts_everything() {
    let data_dir = tempfile::tempdir().expect("tempdir");
    let media_dir = tempfile::tempdir().expect("tempdir");
    let db = common::open_db(data_dir.path()).await;

    let root = media_dir.path().to_string_lossy().into_owned();
    common::register_folder(&db, &root).await;

    std::fs::write(media_dir.path().join("a.mp3"), b"not audio").unwrap();
    std::fs::write(media_dir.path().join("b.png"), b"not an image").unwrap();
    std::fs::write(media_dir.path().join("c.txt"), b"ignored").unwrap();

    let queue = make_queue(Arc::clone(&db), Layout::new(data_dir.path()));
    let outcome = queue.clone().start(root.clone());
    assert_eq!(outcome, StartOutcome::Started);
    assert_eq!(outcome.position(), 0);

    // Poll until the worker drains; the corpus is tiny so this is quick.
    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        let status = queue.status();
        if !status.scanning {
            break;
        }
        assert!(Instant::now() < deadline, "refresh did not finish in time");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    let status = queue.status();
    assert_eq!(status.files_total, 2, "only media files are counted");
    assert_eq!(status.files_done, status.files_total);
    assert_eq!(status.queue_length, 0);

    let file_rows = db
        .query_row("SELECT COUNT(*) FROM files", sql_params![], |row| {
            row.get::<_, i64>(0)
        })
        .await
        .expect("count")
        .unwrap_or(0);
    assert_eq!(file_rows, 2, "the .txt file is not indexed by a refresh");

    // Extraction persisted a row per kind even though the bytes are garbage.
    let audio_rows = db
        .query_row(
            "SELECT COUNT(*) FROM audio_metadata am
             JOIN files f ON f.id = am.file_id
             WHERE f.filename = 'a.mp3'",
            sql_params![],
            |row| row.get::<_, i64>(0),
        )
        .await
        .expect("audio rows")
        .unwrap_or(0);
    assert_eq!(audio_rows, 1);

    let image_rows = db
        .query_row(
            "SELECT COUNT(*) FROM image_metadata im
             JOIN files f ON f.id = im.file_id
             WHERE f.filename = 'b.png'",
            sql_params![],
            |row| row.get::<_, i64>(0),
        )
        .await
        .expect("image rows")
        .unwrap_or(0);
    assert_eq!(image_rows, 1);

    // New rows get a content hash.
    let hash: Option<String> = db
        .query_row(
            "SELECT xxhash FROM files WHERE filename = 'a.mp3'",
            sql_params![],
            |row| row.get(0),
        )
        .await
        .expect("hash row")
        .flatten();
    assert_eq!(hash.as_deref().map(str::len), Some(16));
}

#[tokio::test(flavor = "multi_thread")]
async fn rerunning_a_refresh_stays_idempotent() {
    let data_dir = tempfile::tempdir().expect("tempdir");
    let media_dir = tempfile::tempdir().expect("tempdir");
    let db = common::open_db(data_dir.path()).await;

    let root = media_dir.path().to_string_lossy().into_owned();
    common::register_folder(&db, &root).await;
    std::fs::write(media_dir.path().join("a.mp3"), b"not audio").unwrap();

    let queue = make_queue(Arc::clone(&db), Layout::new(data_dir.path()));
    for _ in 0..2 {
        queue.clone().start(root.clone());
        let deadline = Instant::now() + Duration::from_secs(30);
        while queue.status().scanning {
            assert!(Instant::now() < deadline, "refresh did not finish in time");
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    let file_rows = db
        .query_row("SELECT COUNT(*) FROM files", sql_params![], |row| {
            row.get::<_, i64>(0)
        })
        .await
        .expect("count")
        .unwrap_or(0);
    assert_eq!(file_rows, 1);

    // save is idempotent on file_id: still exactly one metadata row.
    let audio_rows = db
        .query_row("SELECT COUNT(*) FROM audio_metadata", sql_params![], |row| {
            row.get::<_, i64>(0)
        })
        .await
        .expect("count")
        .unwrap_or(0);
    assert_eq!(audio_rows, 1);
}

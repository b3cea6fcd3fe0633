mod common;

use std::sync::Arc;

use q2::db::{migrate, migrations, Db, DbError};
use q2::sql_params;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_each_commit_exactly_one_row() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Arc::new(Db::open(dir.path().join("q2.db")).expect("open"));
    db.write(
        "CREATE TABLE notes (id INTEGER PRIMARY KEY AUTOINCREMENT, body TEXT NOT NULL)",
        sql_params![],
    )
    .await
    .expect("create table");

    const WRITERS: usize = 16;
    let mut handles = Vec::new();
    for i in 0..WRITERS {
        let db = Arc::clone(&db);
        handles.push(tokio::spawn(async move {
            db.write(
                "INSERT INTO notes (body) VALUES (?1)",
                sql_params![format!("writer-{i}")],
            )
            .await
            .expect("insert")
            .last_insert_id
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.expect("join"));
    }

    // Serialized writes: every writer sees its own rowid, no duplicates.
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), WRITERS);

    let count = db
        .query_row("SELECT COUNT(*) FROM notes", sql_params![], |row| {
            row.get::<_, i64>(0)
        })
        .await
        .expect("count")
        .unwrap_or(0);
    assert_eq!(count as usize, WRITERS);
}

#[tokio::test(flavor = "multi_thread")]
async fn migrate_is_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Arc::new(Db::open(dir.path().join("q2.db")).expect("open"));
    let registry = migrations::all();

    migrate::migrate(&db, &registry).await.expect("first migrate");
    let applied_once = migrate::applied(&db).await.expect("applied");

    migrate::migrate(&db, &registry).await.expect("second migrate");
    let applied_twice = migrate::applied(&db).await.expect("applied");

    assert_eq!(applied_once, applied_twice);
    assert_eq!(applied_once.len(), registry.len());
    // Ascending id order is the apply order.
    let mut sorted = applied_once.clone();
    sorted.sort();
    assert_eq!(applied_once, sorted);
}

#[tokio::test(flavor = "multi_thread")]
async fn migrate_down_rolls_back_most_recent_first() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = common::open_db(dir.path()).await;
    let registry = migrations::all();

    migrate::migrate_down(&db, &registry, 2).await.expect("down");

    let applied = migrate::applied(&db).await.expect("applied");
    assert_eq!(applied.len(), registry.len() - 2);
    assert!(!applied.contains(&"006_create_audio_metadata".to_string()));
    assert!(!applied.contains(&"005_create_image_metadata".to_string()));

    let tables: Vec<String> = db
        .query(
            "SELECT name FROM sqlite_master WHERE type='table'",
            sql_params![],
            |row| row.get(0),
        )
        .await
        .expect("tables");
    assert!(!tables.contains(&"audio_metadata".to_string()));
    assert!(!tables.contains(&"image_metadata".to_string()));
    assert!(tables.contains(&"files".to_string()));
}

#[tokio::test(flavor = "multi_thread")]
async fn closed_gateway_rejects_new_writes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = common::open_db(dir.path()).await;

    let db_for_close = Arc::clone(&db);
    tokio::task::spawn_blocking(move || db_for_close.close())
        .await
        .expect("close");

    let result = db
        .write(
            "INSERT INTO folders (path) VALUES (?1)",
            sql_params!["/after-close"],
        )
        .await;
    assert!(matches!(result, Err(DbError::Closed)));
}

#[tokio::test(flavor = "multi_thread")]
async fn folder_paths_are_unique() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = common::open_db(dir.path()).await;

    common::register_folder(&db, "/music").await;
    let dup = db
        .write(
            "INSERT OR IGNORE INTO folders (path) VALUES (?1)",
            sql_params!["/music"],
        )
        .await
        .expect("insert");
    assert_eq!(dup.rows_affected, 0);
}

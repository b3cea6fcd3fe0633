use std::path::Path;
use std::sync::Arc;

use q2::db::{migrate, migrations, Db};
use q2::sql_params;

/// Open a migrated database inside `dir`.
pub async fn open_db(dir: &Path) -> Arc<Db> {
    let db = Arc::new(Db::open(dir.join("q2.db")).expect("open database"));
    migrate::migrate(&db, &migrations::all())
        .await
        .expect("run migrations");
    db
}

/// Register a folder row, returning its id.
pub async fn register_folder(db: &Db, path: &str) -> i64 {
    let result = db
        .write(
            "INSERT INTO folders (path) VALUES (?1)",
            sql_params![q2::paths::normalize(path)],
        )
        .await
        .expect("insert folder");
    result.last_insert_id
}

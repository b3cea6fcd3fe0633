//! Versioned schema migrations.
//!
//! Migration ids sort lexicographically; the `_migrations` table is the
//! authority on what has been applied, not file presence. Apply order is
//! ascending id, rollback order descending.

use std::collections::{HashMap, HashSet};

use rusqlite::Connection;

use crate::db::{Db, DbError};
use crate::sql_params;

pub type MigrationFn = fn(&Connection) -> rusqlite::Result<()>;

pub struct Migration {
    pub id: &'static str,
    pub up: MigrationFn,
    pub down: MigrationFn,
}

#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    #[error("migration {id} failed: {source}")]
    Apply { id: String, source: DbError },
    #[error("rollback of migration {id} failed: {source}")]
    Rollback { id: String, source: DbError },
    #[error("migration {0} not found in registry")]
    UnknownId(String),
    #[error(transparent)]
    Db(#[from] DbError),
}

/// Apply all pending migrations in ascending id order, recording each one.
/// Aborts on the first failure, surfacing the id and cause.
pub async fn migrate(db: &Db, registry: &[Migration]) -> Result<(), MigrateError> {
    db.write(
        "CREATE TABLE IF NOT EXISTS _migrations (
            id TEXT PRIMARY KEY,
            applied_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        sql_params![],
    )
    .await?;

    let applied: HashSet<String> = applied_ids(db).await?.into_iter().collect();

    let mut pending: Vec<&Migration> = registry
        .iter()
        .filter(|m| !applied.contains(m.id))
        .collect();
    pending.sort_by_key(|m| m.id);

    for m in pending {
        let up = m.up;
        db.with_write_conn(move |conn| up(conn))
            .await
            .map_err(|source| MigrateError::Apply { id: m.id.to_owned(), source })?;

        db.write(
            "INSERT INTO _migrations (id, applied_at) VALUES (?1, ?2)",
            sql_params![m.id, chrono::Utc::now().to_rfc3339()],
        )
        .await
        .map_err(|source| MigrateError::Apply { id: m.id.to_owned(), source })?;

        tracing::info!("applied migration {}", m.id);
    }

    Ok(())
}

/// Roll back the `n` most recently applied migrations (all of them if
/// `n == 0`). Rolling back an id missing from the registry is fatal.
pub async fn migrate_down(db: &Db, registry: &[Migration], n: usize) -> Result<(), MigrateError> {
    let mut applied = applied_ids(db).await?;
    applied.sort();
    applied.reverse();

    let n = if n == 0 || n > applied.len() { applied.len() } else { n };

    let by_id: HashMap<&str, &Migration> = registry.iter().map(|m| (m.id, m)).collect();

    for id in applied.into_iter().take(n) {
        let m = by_id
            .get(id.as_str())
            .ok_or_else(|| MigrateError::UnknownId(id.clone()))?;

        let down = m.down;
        db.with_write_conn(move |conn| down(conn))
            .await
            .map_err(|source| MigrateError::Rollback { id: id.clone(), source })?;

        db.write("DELETE FROM _migrations WHERE id = ?1", sql_params![id.as_str()])
            .await
            .map_err(|source| MigrateError::Rollback { id: id.clone(), source })?;

        tracing::info!("rolled back migration {id}");
    }

    Ok(())
}

/// Applied migration ids in ascending order.
pub async fn applied(db: &Db) -> Result<Vec<String>, MigrateError> {
    let mut ids = applied_ids(db).await?;
    ids.sort();
    Ok(ids)
}

async fn applied_ids(db: &Db) -> Result<Vec<String>, DbError> {
    let table_count = db
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='_migrations'",
            sql_params![],
            |row| row.get::<_, i64>(0),
        )
        .await?
        .unwrap_or(0);
    if table_count == 0 {
        return Ok(Vec::new());
    }

    db.query("SELECT id FROM _migrations", sql_params![], |row| row.get(0))
        .await
}

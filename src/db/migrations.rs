//! The ordered migration set for the index database.

use rusqlite::{params, Connection};

use crate::db::migrate::Migration;

/// Every known migration, in registration order. [`crate::db::migrate::migrate`]
/// sorts by id before applying, so ordering here is only for readability.
pub fn all() -> Vec<Migration> {
    vec![
        Migration {
            id: "001_create_folders",
            up: create_folders_up,
            down: create_folders_down,
        },
        Migration {
            id: "002_fix_case_sensitivity",
            up: fix_case_sensitivity_up,
            down: fix_case_sensitivity_down,
        },
        Migration {
            id: "003_create_files",
            up: create_files_up,
            down: create_files_down,
        },
        Migration {
            id: "004_create_scan_queue",
            up: create_scan_queue_up,
            down: create_scan_queue_down,
        },
        Migration {
            id: "005_create_image_metadata",
            up: create_image_metadata_up,
            down: create_image_metadata_down,
        },
        Migration {
            id: "006_create_audio_metadata",
            up: create_audio_metadata_up,
            down: create_audio_metadata_down,
        },
    ]
}

fn create_folders_up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE folders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL UNIQUE COLLATE NOCASE,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
    )
}

fn create_folders_down(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("DROP TABLE folders")
}

/// Replace the NOCASE unique index with plain byte equality. Case folding is
/// an application concern: paths are normalized (lowercased on
/// case-insensitive hosts) before they reach the database, and NOCASE would
/// wrongly collapse distinct paths on case-sensitive filesystems.
fn fix_case_sensitivity_up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE folders_new (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL UNIQUE,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
    )?;

    let rows: Vec<(String, String)> = {
        let mut stmt = conn.prepare("SELECT path, created_at FROM folders")?;
        let mapped = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        mapped.collect::<rusqlite::Result<_>>()?
    };

    for (path, created_at) in rows {
        let path = if cfg!(windows) { path.to_lowercase() } else { path };
        conn.execute(
            "INSERT OR IGNORE INTO folders_new (path, created_at) VALUES (?1, ?2)",
            params![path, created_at],
        )?;
    }

    conn.execute_batch(
        "DROP TABLE folders;
         ALTER TABLE folders_new RENAME TO folders;",
    )
}

fn fix_case_sensitivity_down(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE folders_old (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL UNIQUE COLLATE NOCASE,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
    )?;

    let rows: Vec<(String, String)> = {
        let mut stmt = conn.prepare("SELECT path, created_at FROM folders")?;
        let mapped = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        mapped.collect::<rusqlite::Result<_>>()?
    };

    for (path, created_at) in rows {
        conn.execute(
            "INSERT OR IGNORE INTO folders_old (path, created_at) VALUES (?1, ?2)",
            params![path, created_at],
        )?;
    }

    conn.execute_batch(
        "DROP TABLE folders;
         ALTER TABLE folders_old RENAME TO folders;",
    )
}

fn create_files_up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            folder_id INTEGER NOT NULL,
            path TEXT NOT NULL UNIQUE,
            filename TEXT NOT NULL,
            extension TEXT,
            mediatype TEXT,
            size INTEGER NOT NULL,
            created_at DATETIME,
            modified_at DATETIME,
            indexed_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            thumbnail_small_path TEXT,
            xxhash TEXT,
            thumbnail_large_path TEXT,
            FOREIGN KEY (folder_id) REFERENCES folders(id) ON DELETE CASCADE
        );
        CREATE INDEX idx_files_folder_id ON files(folder_id);
        CREATE INDEX idx_files_path ON files(path);
        CREATE INDEX idx_files_mediatype ON files(mediatype);",
    )
}

fn create_files_down(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("DROP TABLE files")
}

fn create_scan_queue_up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE scan_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL UNIQUE,
            requested_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            started_at DATETIME,
            completed_at DATETIME
        )",
    )
}

fn create_scan_queue_down(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("DROP TABLE scan_queue")
}

fn create_image_metadata_up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE image_metadata (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id INTEGER NOT NULL UNIQUE,
            camera_make TEXT,
            camera_model TEXT,
            date_taken DATETIME,
            width INTEGER,
            height INTEGER,
            orientation INTEGER,
            iso INTEGER,
            exposure_time TEXT,
            f_number REAL,
            focal_length REAL,
            gps_latitude REAL,
            gps_longitude REAL,
            FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE
        );
        CREATE INDEX idx_image_metadata_file_id ON image_metadata(file_id);",
    )
}

fn create_image_metadata_down(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("DROP TABLE image_metadata")
}

fn create_audio_metadata_up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE audio_metadata (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id INTEGER NOT NULL UNIQUE,
            artist TEXT,
            album TEXT,
            title TEXT,
            genre TEXT,
            track_number INTEGER,
            year INTEGER,
            duration_seconds INTEGER,
            bitrate INTEGER,
            FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE
        );
        CREATE INDEX idx_audio_metadata_file_id ON audio_metadata(file_id);",
    )
}

fn create_audio_metadata_down(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("DROP TABLE audio_metadata")
}

//! SQLite gateway built on the single-writer pattern.
//!
//! All mutations are serialized through one dedicated thread that owns the
//! sole read-write connection; reads run concurrently on a small pool of
//! read-only connections. WAL journaling lets readers observe a consistent
//! snapshot while the writer is active.

pub mod migrate;
pub mod migrations;

use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex};
use std::thread;
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};
use tokio::sync::{mpsc, oneshot};

/// Owned SQL parameter value, safe to ship across the writer channel.
pub type SqlValue = rusqlite::types::Value;

const WRITE_QUEUE_CAPACITY: usize = 100;
const MAX_READERS: usize = 10;
const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Conversion into an owned [`SqlValue`], used by [`crate::sql_params!`].
pub trait IntoSqlValue {
    fn into_sql_value(self) -> SqlValue;
}

macro_rules! impl_into_sql_int {
    ($($t:ty),+) => {
        $(impl IntoSqlValue for $t {
            fn into_sql_value(self) -> SqlValue {
                SqlValue::Integer(self as i64)
            }
        })+
    };
}

impl_into_sql_int!(i64, i32, u32, u64, usize);

impl IntoSqlValue for &str {
    fn into_sql_value(self) -> SqlValue {
        SqlValue::Text(self.to_owned())
    }
}

impl IntoSqlValue for String {
    fn into_sql_value(self) -> SqlValue {
        SqlValue::Text(self)
    }
}

impl IntoSqlValue for f64 {
    fn into_sql_value(self) -> SqlValue {
        SqlValue::Real(self)
    }
}

impl<T: IntoSqlValue> IntoSqlValue for Option<T> {
    fn into_sql_value(self) -> SqlValue {
        match self {
            Some(v) => v.into_sql_value(),
            None => SqlValue::Null,
        }
    }
}

impl IntoSqlValue for SqlValue {
    fn into_sql_value(self) -> SqlValue {
        self
    }
}

/// Build an owned parameter vector for the gateway's query methods.
#[macro_export]
macro_rules! sql_params {
    () => { Vec::<$crate::db::SqlValue>::new() };
    ($($p:expr),+ $(,)?) => {
        vec![$($crate::db::IntoSqlValue::into_sql_value($p)),+]
    };
}

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("database is closed")]
    Closed,
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("database worker failed: {0}")]
    Task(String),
}

/// Result of a single write statement.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteResult {
    pub last_insert_id: i64,
    pub rows_affected: usize,
}

enum WriteRequest {
    Exec {
        sql: String,
        params: Vec<SqlValue>,
        reply: oneshot::Sender<Result<WriteResult, DbError>>,
    },
    /// Run a closure on the writer connection. Used by the migration engine
    /// so DDL stays serialized with every other write.
    With {
        f: Box<dyn FnOnce(&Connection) -> rusqlite::Result<()> + Send>,
        reply: oneshot::Sender<Result<(), DbError>>,
    },
}

pub struct Db {
    write_tx: Mutex<Option<mpsc::Sender<WriteRequest>>>,
    writer: Mutex<Option<thread::JoinHandle<()>>>,
    readers: std::sync::Arc<ReadPool>,
}

impl Db {
    /// Open (creating if necessary) the database at `path` and start the
    /// writer thread.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let path = path.as_ref().to_path_buf();

        let write_conn = Connection::open(&path)?;
        write_conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;

        let (tx, rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        let handle = thread::Builder::new()
            .name("q2-db-writer".into())
            .spawn(move || writer_loop(write_conn, rx))
            .map_err(|e| DbError::Task(e.to_string()))?;

        Ok(Db {
            write_tx: Mutex::new(Some(tx)),
            writer: Mutex::new(Some(handle)),
            readers: std::sync::Arc::new(ReadPool::new(path)),
        })
    }

    fn sender(&self) -> Result<mpsc::Sender<WriteRequest>, DbError> {
        self.write_tx
            .lock()
            .expect("write_tx lock poisoned")
            .clone()
            .ok_or(DbError::Closed)
    }

    /// Execute a single mutating statement through the writer.
    pub async fn write(&self, sql: &str, params: Vec<SqlValue>) -> Result<WriteResult, DbError> {
        let (reply, rx) = oneshot::channel();
        let req = WriteRequest::Exec { sql: sql.to_owned(), params, reply };
        self.sender()?.send(req).await.map_err(|_| DbError::Closed)?;
        rx.await.map_err(|_| DbError::Closed)?
    }

    /// Blocking mirror of [`Db::write`] for dedicated worker threads. Must not
    /// be called from an async runtime thread.
    pub fn write_blocking(&self, sql: &str, params: Vec<SqlValue>) -> Result<WriteResult, DbError> {
        let (reply, rx) = oneshot::channel();
        let req = WriteRequest::Exec { sql: sql.to_owned(), params, reply };
        self.sender()?.blocking_send(req).map_err(|_| DbError::Closed)?;
        rx.blocking_recv().map_err(|_| DbError::Closed)?
    }

    /// Run `f` against the writer connection, serialized with all writes.
    pub async fn with_write_conn<F>(&self, f: F) -> Result<(), DbError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<()> + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let req = WriteRequest::With { f: Box::new(f), reply };
        self.sender()?.send(req).await.map_err(|_| DbError::Closed)?;
        rx.await.map_err(|_| DbError::Closed)?
    }

    /// Run a read query, mapping every row with `map`.
    pub async fn query<T, F>(
        &self,
        sql: &str,
        params: Vec<SqlValue>,
        map: F,
    ) -> Result<Vec<T>, DbError>
    where
        T: Send + 'static,
        F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T> + Send + 'static,
    {
        let pool = std::sync::Arc::clone(&self.readers);
        let sql = sql.to_owned();
        tokio::task::spawn_blocking(move || pool.query(&sql, params, map))
            .await
            .map_err(|e| DbError::Task(e.to_string()))?
    }

    /// Run a read query expected to yield zero or one row.
    pub async fn query_row<T, F>(
        &self,
        sql: &str,
        params: Vec<SqlValue>,
        map: F,
    ) -> Result<Option<T>, DbError>
    where
        T: Send + 'static,
        F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T> + Send + 'static,
    {
        let pool = std::sync::Arc::clone(&self.readers);
        let sql = sql.to_owned();
        tokio::task::spawn_blocking(move || pool.query_row(&sql, params, map))
            .await
            .map_err(|e| DbError::Task(e.to_string()))?
    }

    /// Blocking mirror of [`Db::query`].
    pub fn query_blocking<T, F>(
        &self,
        sql: &str,
        params: Vec<SqlValue>,
        map: F,
    ) -> Result<Vec<T>, DbError>
    where
        F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    {
        self.readers.query(sql, params, map)
    }

    /// Blocking mirror of [`Db::query_row`].
    pub fn query_row_blocking<T, F>(
        &self,
        sql: &str,
        params: Vec<SqlValue>,
        map: F,
    ) -> Result<Option<T>, DbError>
    where
        F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    {
        self.readers.query_row(sql, params, map)
    }

    /// Stop accepting writes, drain the pending queue, and release all
    /// connections. Writes observed before close complete; later writes fail
    /// with [`DbError::Closed`].
    pub fn close(&self) {
        drop(self.write_tx.lock().expect("write_tx lock poisoned").take());
        if let Some(handle) = self.writer.lock().expect("writer lock poisoned").take() {
            let _ = handle.join();
        }
        self.readers.drain();
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        self.close();
    }
}

fn writer_loop(conn: Connection, mut rx: mpsc::Receiver<WriteRequest>) {
    // blocking_recv drains every buffered request before reporting closure,
    // which is exactly the shutdown contract.
    while let Some(req) = rx.blocking_recv() {
        match req {
            WriteRequest::Exec { sql, params, reply } => {
                let result = execute_write(&conn, &sql, params);
                let _ = reply.send(result);
            }
            WriteRequest::With { f, reply } => {
                let _ = reply.send(f(&conn).map_err(DbError::from));
            }
        }
    }
}

fn execute_write(
    conn: &Connection,
    sql: &str,
    params: Vec<SqlValue>,
) -> Result<WriteResult, DbError> {
    let rows_affected = conn.execute(sql, rusqlite::params_from_iter(params))?;
    Ok(WriteResult {
        last_insert_id: conn.last_insert_rowid(),
        rows_affected,
    })
}

/// Bounded pool of read-only connections. Readers block on the condvar when
/// all connections are checked out.
struct ReadPool {
    path: PathBuf,
    state: Mutex<PoolState>,
    available: Condvar,
}

struct PoolState {
    idle: Vec<Connection>,
    open: usize,
}

impl ReadPool {
    fn new(path: PathBuf) -> Self {
        ReadPool {
            path,
            state: Mutex::new(PoolState { idle: Vec::new(), open: 0 }),
            available: Condvar::new(),
        }
    }

    fn query<T, F>(&self, sql: &str, params: Vec<SqlValue>, map: F) -> Result<Vec<T>, DbError>
    where
        F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(params), map)?;
            rows.collect()
        })
    }

    fn query_row<T, F>(&self, sql: &str, params: Vec<SqlValue>, map: F) -> Result<Option<T>, DbError>
    where
        F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let mut rows = stmt.query_map(rusqlite::params_from_iter(params), map)?;
            rows.next().transpose()
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, DbError> {
        let conn = self.acquire()?;
        let result = f(&conn);
        self.release(conn);
        result.map_err(DbError::from)
    }

    fn acquire(&self) -> Result<Connection, DbError> {
        let mut state = self.state.lock().expect("read pool lock poisoned");
        loop {
            if let Some(conn) = state.idle.pop() {
                return Ok(conn);
            }
            if state.open < MAX_READERS {
                state.open += 1;
                drop(state);
                return match self.open_reader() {
                    Ok(conn) => Ok(conn),
                    Err(e) => {
                        self.state.lock().expect("read pool lock poisoned").open -= 1;
                        self.available.notify_one();
                        Err(e)
                    }
                };
            }
            state = self
                .available
                .wait(state)
                .expect("read pool lock poisoned");
        }
    }

    fn release(&self, conn: Connection) {
        let mut state = self.state.lock().expect("read pool lock poisoned");
        state.idle.push(conn);
        drop(state);
        self.available.notify_one();
    }

    fn open_reader(&self) -> Result<Connection, DbError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&self.path, flags)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    fn drain(&self) {
        let mut state = self.state.lock().expect("read pool lock poisoned");
        state.open -= state.idle.len();
        state.idle.clear();
    }
}

//! Storage adapter: owns the SQLite connection, applies pragmas, and serializes
//! access behind a mutex so the handle can be shared across threads.

use crate::error::{Result, SqlerError};
use parking_lot::{Mutex, ReentrantMutex};
use rusqlite::{Connection, OpenFlags};
use std::cell::RefCell;
use std::collections::VecDeque;

#[cfg(feature = "async")]
pub mod asynchronous;

/// One row of a result set, as owned SQLite values.
pub type Row = Vec<rusqlite::types::Value>;

/// A buffered result set. Every read realizes immediately under the adapter's
/// lock (see module docs); the cursor itself only guards the already-fetched
/// buffer, so multiple threads may interleave `fetch_*` calls on the same
/// cursor safely without touching the connection again.
pub struct Cursor {
    rows: Mutex<VecDeque<Row>>,
    last_inserted_id: Option<i64>,
    rows_affected: usize,
}

impl Cursor {
    fn new(rows: Vec<Row>, last_inserted_id: Option<i64>, rows_affected: usize) -> Self {
        Cursor {
            rows: Mutex::new(rows.into()),
            last_inserted_id,
            rows_affected,
        }
    }

    /// Pop the next row, or `None` if exhausted.
    pub fn fetch_one(&self) -> Option<Row> {
        self.rows.lock().pop_front()
    }

    /// Drain every remaining row.
    pub fn fetch_all(&self) -> Vec<Row> {
        let mut guard = self.rows.lock();
        guard.drain(..).collect()
    }

    /// Drain up to `n` remaining rows.
    pub fn fetch_many(&self, n: usize) -> Vec<Row> {
        let mut guard = self.rows.lock();
        let take = n.min(guard.len());
        guard.drain(..take).collect()
    }

    /// The rowid assigned by the most recent `INSERT`, if any.
    pub fn last_inserted_id(&self) -> Option<i64> {
        self.last_inserted_id
    }

    /// Number of rows touched by the statement that produced this cursor
    /// (`UPDATE`/`DELETE` rowcount).
    pub fn rows_affected(&self) -> usize {
        self.rows_affected
    }
}

/// Pragmas applied when opening a connection, one SQL statement per entry.
type Pragmas = Vec<&'static str>;

const IN_MEMORY_PRAGMAS: &[&str] = &[
    "PRAGMA foreign_keys = ON",
    "PRAGMA synchronous = OFF",
    "PRAGMA journal_mode = MEMORY",
    "PRAGMA temp_store = MEMORY",
    "PRAGMA cache_size = -32000",
    "PRAGMA locking_mode = EXCLUSIVE",
];

const ON_DISK_PRAGMAS: &[&str] = &[
    "PRAGMA foreign_keys = ON",
    "PRAGMA busy_timeout = 5000",
    "PRAGMA journal_mode = WAL",
    "PRAGMA synchronous = NORMAL",
    "PRAGMA cache_size = -64000",
    "PRAGMA wal_autocheckpoint = 1000",
    "PRAGMA mmap_size = 268435456",
    "PRAGMA temp_store = MEMORY",
];

/// Owns the single SQLite connection used by a [`crate::Database`]. Every
/// `execute*` call and every cursor fetch is serialized through a reentrant
/// mutex, so the adapter may be shared across worker threads freely (the
/// connection itself is opened without SQLite's own mutex, since this lock
/// already provides the same guarantee without double-locking).
pub struct SqliteAdapter {
    path: String,
    lock: ReentrantMutex<RefCell<Option<Connection>>>,
    pragmas: Pragmas,
}

impl SqliteAdapter {
    fn new(path: impl Into<String>, pragmas: Pragmas) -> Self {
        SqliteAdapter {
            path: path.into(),
            lock: ReentrantMutex::new(RefCell::new(None)),
            pragmas,
        }
    }

    /// Connects to an in-memory database. `shared = true` uses SQLite's named
    /// shared-cache namespace (`file::memory:?cache=shared`) so independent
    /// adapter instances in the same process see the same data; `false` opens
    /// a private `:memory:` database visible only through this handle.
    pub fn in_memory(shared: bool) -> Self {
        let uri = if shared {
            "file::memory:?cache=shared"
        } else {
            ":memory:"
        };
        SqliteAdapter::new(uri, IN_MEMORY_PRAGMAS.to_vec())
    }

    /// Connects (creating if absent) to a database file on disk, with WAL
    /// journaling and a busy timeout tuned for concurrent writers.
    pub fn on_disk(path: impl Into<String>) -> Self {
        SqliteAdapter::new(path, ON_DISK_PRAGMAS.to_vec())
    }

    /// Opens the underlying connection and applies the configured pragmas.
    pub fn connect(&self) -> Result<()> {
        let guard = self.lock.lock();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&self.path, flags)?;
        for pragma in &self.pragmas {
            conn.execute_batch(pragma)?;
        }
        log::debug!("sqler: connected to {}", self.path);
        *guard.borrow_mut() = Some(conn);
        Ok(())
    }

    /// Closes the connection. Subsequent operations fail with
    /// [`SqlerError::NotConnected`] until [`connect`](Self::connect) is
    /// called again.
    pub fn close(&self) {
        let guard = self.lock.lock();
        if guard.borrow_mut().take().is_some() {
            log::debug!("sqler: closed connection to {}", self.path);
        }
    }

    fn with_connection<R>(&self, f: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
        let guard = self.lock.lock();
        let cell = guard.borrow();
        match cell.as_ref() {
            Some(conn) => f(conn),
            None => Err(SqlerError::NotConnected),
        }
    }

    /// Executes one parameterized statement and returns a cursor over the
    /// fully materialized result set (if any rows are produced).
    pub fn execute(&self, sql: &str, params: &[rusqlite::types::Value]) -> Result<Cursor> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let column_count = stmt.column_count();
            let mut rows = Vec::new();
            {
                let mut result_rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
                while let Some(row) = result_rows.next()? {
                    let mut values = Vec::with_capacity(column_count);
                    for i in 0..column_count {
                        values.push(row.get::<_, rusqlite::types::Value>(i)?);
                    }
                    rows.push(values);
                }
            }
            let last_inserted_id = Some(conn.last_insert_rowid()).filter(|_| {
                sql.trim_start()
                    .get(0..6)
                    .map(|s| s.eq_ignore_ascii_case("insert"))
                    .unwrap_or(false)
            });
            let rows_affected = conn.changes() as usize;
            Ok(Cursor::new(rows, last_inserted_id, rows_affected))
        })
    }

    /// Runs one SQL statement once per entry in `param_rows`, inside a single
    /// transaction.
    pub fn execute_many(&self, sql: &str, param_rows: &[Vec<rusqlite::types::Value>]) -> Result<()> {
        self.with_connection(|conn| {
            let tx = conn.unchecked_transaction()?;
            {
                let mut stmt = tx.prepare(sql)?;
                for params in param_rows {
                    stmt.execute(rusqlite::params_from_iter(params.iter()))?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Runs a multi-statement script (DDL, typically) and commits.
    pub fn execute_script(&self, sql_text: &str) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute_batch(sql_text)?;
            Ok(())
        })
    }

    /// Commits the current transaction. SQLite auto-commits outside of an
    /// explicit `BEGIN`, so this is a no-op safety net for callers that want
    /// to be explicit about transaction boundaries.
    pub fn commit(&self) -> Result<()> {
        self.with_connection(|_conn| Ok(()))
    }

    /// Runs `f` with direct access to the underlying connection inside one
    /// lock acquisition, committing implicitly on success (SQLite's default
    /// autocommit) and surfacing any error from `f` unchanged. Used by
    /// operations like `bulk_upsert` that need several statements to observe
    /// a consistent window (e.g. `max(id)` before and after a batch insert).
    pub fn scoped<R>(&self, f: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
        self.with_connection(|conn| {
            let tx = conn.unchecked_transaction()?;
            match f(conn) {
                Ok(value) => {
                    tx.commit()?;
                    Ok(value)
                }
                Err(e) => {
                    let _ = tx.rollback();
                    Err(e)
                }
            }
        })
    }
}

//! Async adapter: same contract as [`super::SqliteAdapter`], but every entry
//! point awaits a `spawn_blocking` task. rusqlite has no async driver of its
//! own, so this is the standard way to keep a blocking C binding off the
//! executor thread; cancellation at an `.await` point is only ever observed
//! between statements (never mid-statement), since each blocking closure runs
//! a single adapter call to completion before the task can be cancelled.

use super::{Cursor, SqliteAdapter};
use crate::error::{Result, SqlerError};
use std::sync::Arc;

/// Async wrapper around [`SqliteAdapter`]. Connect/execute/close all hop onto
/// a blocking-pool thread and await the result.
#[derive(Clone)]
pub struct AsyncSqliteAdapter {
    inner: Arc<SqliteAdapter>,
}

impl AsyncSqliteAdapter {
    pub fn in_memory(shared: bool) -> Self {
        AsyncSqliteAdapter {
            inner: Arc::new(SqliteAdapter::in_memory(shared)),
        }
    }

    pub fn on_disk(path: impl Into<String>) -> Self {
        AsyncSqliteAdapter {
            inner: Arc::new(SqliteAdapter::on_disk(path)),
        }
    }

    /// The synchronous adapter backing this handle, for code paths (like the
    /// document store) that are shared between the sync and async surfaces.
    pub fn inner(&self) -> Arc<SqliteAdapter> {
        self.inner.clone()
    }

    async fn spawn<R: Send + 'static>(
        &self,
        f: impl FnOnce(&SqliteAdapter) -> Result<R> + Send + 'static,
    ) -> Result<R> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|e| SqlerError::Other(format!("blocking task panicked: {e}")))?
    }

    pub async fn connect(&self) -> Result<()> {
        self.spawn(|adapter| adapter.connect()).await
    }

    pub async fn close(&self) -> Result<()> {
        self.spawn(|adapter| {
            adapter.close();
            Ok(())
        })
        .await
    }

    pub async fn execute(
        &self,
        sql: impl Into<String>,
        params: Vec<rusqlite::types::Value>,
    ) -> Result<Cursor> {
        let sql = sql.into();
        self.spawn(move |adapter| adapter.execute(&sql, &params))
            .await
    }

    pub async fn execute_script(&self, sql_text: impl Into<String>) -> Result<()> {
        let sql_text = sql_text.into();
        self.spawn(move |adapter| adapter.execute_script(&sql_text))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "current_thread")]
    async fn connect_and_execute_roundtrip() {
        let adapter = AsyncSqliteAdapter::in_memory(false);
        adapter.connect().await.unwrap();
        adapter
            .execute_script("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)")
            .await
            .unwrap();
        let cur = adapter
            .execute(
                "INSERT INTO t (v) VALUES (?1)",
                vec![rusqlite::types::Value::Text("hi".into())],
            )
            .await
            .unwrap();
        assert_eq!(cur.last_inserted_id(), Some(1));
        adapter.close().await.unwrap();
    }
}

//! Document store: per-table auto-creation and CRUD over `(id, data)` rows
//! holding an opaque JSON payload, plus a versioned variant adding `_version`
//! and atomic compare-and-swap.

use crate::adapter::SqliteAdapter;
use crate::error::{Result, SqlerError};
use rusqlite::types::Value as SqlValue;
use serde_json::Value as JsonValue;

fn text(s: &str) -> SqlValue {
    SqlValue::Text(s.to_string())
}

fn int(i: i64) -> SqlValue {
    SqlValue::Integer(i)
}

fn row_text(row: &[SqlValue], idx: usize) -> Result<String> {
    match row.get(idx) {
        Some(SqlValue::Text(s)) => Ok(s.clone()),
        other => Err(SqlerError::Other(format!(
            "expected TEXT column at index {idx}, found {other:?}"
        ))),
    }
}

fn row_int(row: &[SqlValue], idx: usize) -> Result<i64> {
    match row.get(idx) {
        Some(SqlValue::Integer(i)) => Ok(*i),
        other => Err(SqlerError::Other(format!(
            "expected INTEGER column at index {idx}, found {other:?}"
        ))),
    }
}

/// Attaches the row id back onto a parsed JSON document as the reserved
/// `id` key. The payload never carries this key on disk; it is always read
/// back from the row column.
fn with_id(mut doc: JsonValue, id: i64) -> JsonValue {
    if let JsonValue::Object(map) = &mut doc {
        map.insert("id".to_string(), JsonValue::Number(id.into()));
    }
    doc
}

/// Per-table JSON document CRUD over a [`SqliteAdapter`].
pub struct DocumentStore<'a> {
    adapter: &'a SqliteAdapter,
}

impl<'a> DocumentStore<'a> {
    pub fn new(adapter: &'a SqliteAdapter) -> Self {
        DocumentStore { adapter }
    }

    /// Idempotent DDL for the unversioned schema.
    pub fn ensure_table(&self, table: &str) -> Result<()> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {table} (id INTEGER PRIMARY KEY AUTOINCREMENT, data JSON NOT NULL);"
        );
        self.adapter.execute_script(&ddl)
    }

    /// Idempotent DDL adding the `_version` column to an existing or new
    /// table.
    pub fn ensure_versioned_table(&self, table: &str) -> Result<()> {
        self.ensure_table(table)?;
        let has_version = self
            .adapter
            .execute(&format!("PRAGMA table_info({table})"), &[])?
            .fetch_all()
            .iter()
            .any(|row| matches!(row.get(1), Some(SqlValue::Text(name)) if name == "_version"));
        if !has_version {
            self.adapter.execute_script(&format!(
                "ALTER TABLE {table} ADD COLUMN _version INTEGER NOT NULL DEFAULT 0;"
            ))?;
        }
        Ok(())
    }

    pub fn insert_document(&self, table: &str, doc: &JsonValue) -> Result<i64> {
        self.ensure_table(table)?;
        let payload = serde_json::to_string(doc)?;
        let cur = self.adapter.execute(
            &format!("INSERT INTO {table} (data) VALUES (json(?1));"),
            &[text(&payload)],
        )?;
        cur.last_inserted_id()
            .ok_or_else(|| SqlerError::Other("insert did not assign a rowid".into()))
    }

    pub fn upsert_document(&self, table: &str, id: Option<i64>, doc: &JsonValue) -> Result<i64> {
        self.ensure_table(table)?;
        let Some(id) = id else {
            return self.insert_document(table, doc);
        };
        let payload = serde_json::to_string(doc)?;
        self.adapter.execute(
            &format!("UPDATE {table} SET data = json(?1) WHERE id = ?2;"),
            &[text(&payload), int(id)],
        )?;
        Ok(id)
    }

    /// Upserts a batch of documents in one scoped acquisition. New documents'
    /// ids are assigned by capturing `max(id)` before and after the batch and
    /// distributing the gap sequentially in input order; see the crate-level
    /// design notes for why this is fragile under concurrent writers and what
    /// a stricter implementation would do instead.
    pub fn bulk_upsert(&self, table: &str, docs: &[(Option<i64>, JsonValue)]) -> Result<Vec<i64>> {
        self.ensure_table(table)?;
        let new_count = docs.iter().filter(|(id, _)| id.is_none()).count();

        let assigned = self.adapter.scoped(|conn| {
            let max_before: i64 = conn.query_row(
                &format!("SELECT COALESCE(MAX(id), 0) FROM {table}"),
                [],
                |row| row.get(0),
            )?;

            {
                let mut stmt = conn.prepare(&format!(
                    "INSERT INTO {table} (id, data) VALUES (?1, json(?2)) \
                     ON CONFLICT(id) DO UPDATE SET data = excluded.data"
                ))?;
                for (id, doc) in docs {
                    let payload = serde_json::to_string(doc)?;
                    match id {
                        Some(id) => stmt.execute(rusqlite::params![id, payload])?,
                        None => stmt.execute(rusqlite::params![None::<i64>, payload])?,
                    };
                }
            }

            let max_after: i64 = conn.query_row(
                &format!("SELECT MAX(id) FROM {table}"),
                [],
                |row| row.get(0),
            )?;

            Ok((max_before, max_after))
        })?;

        let (max_before, max_after) = assigned;
        if new_count > 0 {
            let observed = (max_after - max_before) as usize;
            if observed != new_count {
                return Err(SqlerError::BulkIdMismatch {
                    expected: new_count,
                    observed,
                });
            }
        }

        let mut next_new_id = max_before + 1;
        let mut ids = Vec::with_capacity(docs.len());
        for (id, _) in docs {
            match id {
                Some(id) => ids.push(*id),
                None => {
                    ids.push(next_new_id);
                    next_new_id += 1;
                }
            }
        }
        Ok(ids)
    }

    pub fn find_document(&self, table: &str, id: i64) -> Result<Option<JsonValue>> {
        self.ensure_table(table)?;
        let cur = self.adapter.execute(
            &format!("SELECT id, data FROM {table} WHERE id = ?1;"),
            &[int(id)],
        )?;
        match cur.fetch_one() {
            None => Ok(None),
            Some(row) => {
                let id = row_int(&row, 0)?;
                let data = row_text(&row, 1)?;
                let doc: JsonValue = serde_json::from_str(&data)?;
                Ok(Some(with_id(doc, id)))
            }
        }
    }

    /// Reads the stored document along with its `_version` counter.
    pub fn find_document_with_version(&self, table: &str, id: i64) -> Result<Option<JsonValue>> {
        self.ensure_versioned_table(table)?;
        let cur = self.adapter.execute(
            &format!("SELECT id, data, _version FROM {table} WHERE id = ?1;"),
            &[int(id)],
        )?;
        match cur.fetch_one() {
            None => Ok(None),
            Some(row) => {
                let id = row_int(&row, 0)?;
                let data = row_text(&row, 1)?;
                let version = row_int(&row, 2)?;
                let mut doc: JsonValue = serde_json::from_str(&data)?;
                if let JsonValue::Object(map) = &mut doc {
                    map.insert("_version".to_string(), JsonValue::Number(version.into()));
                }
                Ok(Some(with_id(doc, id)))
            }
        }
    }

    /// Insert-or-CAS-update with an expected version. New rows are inserted
    /// at version 0; existing rows are updated only if their stored
    /// `_version` still equals `expected_version`, returning
    /// [`SqlerError::StaleVersion`] otherwise.
    pub fn upsert_with_version(
        &self,
        table: &str,
        id: Option<i64>,
        doc: &JsonValue,
        expected_version: i64,
    ) -> Result<(i64, i64)> {
        self.ensure_versioned_table(table)?;
        let payload = serde_json::to_string(doc)?;

        let Some(id) = id else {
            let cur = self.adapter.execute(
                &format!("INSERT INTO {table} (data, _version) VALUES (json(?1), 0);"),
                &[text(&payload)],
            )?;
            let new_id = cur
                .last_inserted_id()
                .ok_or_else(|| SqlerError::Other("insert did not assign a rowid".into()))?;
            return Ok((new_id, 0));
        };

        let cur = self.adapter.execute(
            &format!(
                "UPDATE {table} SET data = json(?1), _version = _version + 1 \
                 WHERE id = ?2 AND _version = ?3;"
            ),
            &[text(&payload), int(id), int(expected_version)],
        )?;
        if cur.rows_affected() == 0 {
            return Err(SqlerError::StaleVersion {
                table: table.to_string(),
                id,
                expected: expected_version,
            });
        }
        Ok((id, expected_version + 1))
    }

    pub fn delete_document(&self, table: &str, id: i64) -> Result<()> {
        self.ensure_table(table)?;
        self.adapter
            .execute(&format!("DELETE FROM {table} WHERE id = ?1;"), &[int(id)])?;
        Ok(())
    }

    /// Runs caller-supplied SQL that must project `(id, data)` and returns
    /// the parsed documents, each with `id` reattached.
    pub fn execute_sql(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<JsonValue>> {
        let cur = self.adapter.execute(sql, params)?;
        cur.fetch_all()
            .into_iter()
            .map(|row| {
                let id = row_int(&row, 0)?;
                let data = row_text(&row, 1)?;
                let doc: JsonValue = serde_json::from_str(&data)?;
                Ok(with_id(doc, id))
            })
            .collect()
    }

    pub fn create_index(
        &self,
        table: &str,
        field: &str,
        unique: bool,
        name: Option<&str>,
        where_clause: Option<&str>,
    ) -> Result<()> {
        self.ensure_table(table)?;
        let default_name = format!("idx_{table}_{}", field.replace('.', "_"));
        let idx_name = name.unwrap_or(&default_name);
        let unique_sql = if unique { "UNIQUE" } else { "" };
        let expr = if field.starts_with('_') {
            field.to_string()
        } else {
            format!("json_extract(data, '$.{field}')")
        };
        let where_sql = where_clause
            .map(|w| format!("WHERE {w}"))
            .unwrap_or_default();
        let ddl = format!(
            "CREATE {unique_sql} INDEX IF NOT EXISTS {idx_name} ON {table} ({expr}) {where_sql};"
        );
        self.adapter.execute_script(&ddl)
    }

    pub fn drop_index(&self, name: &str) -> Result<()> {
        self.adapter
            .execute_script(&format!("DROP INDEX IF EXISTS {name};"))
    }
}

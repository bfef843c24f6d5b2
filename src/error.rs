use thiserror::Error;

/// Unified error type for every fallible operation in this crate.
#[derive(Error, Debug)]
pub enum SqlerError {
    #[error("database not connected, call connect() first")]
    NotConnected,

    #[error("no adapter set for query")]
    NoAdapter,

    #[error("row {id} not found in table {table} for refresh")]
    NotFound { table: String, id: i64 },

    #[error("cannot reference an unsaved record (missing id) in table {table}")]
    UnsavedReferent { table: String },

    #[error("cannot {op} an unsaved record (missing id) in table {table}")]
    UnsavedOperation { op: &'static str, table: String },

    #[error("stale version for row {id} in table {table}: expected {expected}")]
    StaleVersion {
        table: String,
        id: i64,
        expected: i64,
    },

    #[error("storage locked, retries exhausted after {attempts} attempts")]
    StorageLocked { attempts: u32 },

    #[error("referential integrity violation: {0:?}")]
    ReferentialIntegrity(BrokenReference),

    #[error("mismatch in id assignment during bulk upsert: expected {expected}, observed {observed}")]
    BulkIdMismatch { expected: usize, observed: usize },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Details describing a dangling or structurally invalid reference, used by the
/// restrict-on-delete path and surfaced for malformed-reference diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokenReference {
    pub table: String,
    pub row_id: i64,
    pub path: String,
    pub target_table: String,
    pub target_id: i64,
}

pub type Result<T> = std::result::Result<T, SqlerError>;

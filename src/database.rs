//! Top-level handle tying the storage adapter, the document store, and the
//! reference registry together — the entry point most callers construct.

use crate::adapter::SqliteAdapter;
use crate::error::Result;
use crate::registry::Registry;
use crate::store::DocumentStore;

/// A connected database: one [`SqliteAdapter`] plus the [`Registry`] used to
/// resolve cross-record references loaded through it.
pub struct Database {
    adapter: SqliteAdapter,
    registry: Registry,
}

impl Database {
    /// Opens a private in-memory database and connects immediately.
    pub fn in_memory() -> Result<Self> {
        Self::in_memory_shared(false)
    }

    /// Opens an in-memory database. `shared = true` joins SQLite's named
    /// shared-cache namespace so other adapters in the same process can see
    /// the same data.
    pub fn in_memory_shared(shared: bool) -> Result<Self> {
        let adapter = SqliteAdapter::in_memory(shared);
        adapter.connect()?;
        Ok(Database {
            adapter,
            registry: Registry::new(),
        })
    }

    /// Opens (creating if absent) a database file on disk and connects
    /// immediately.
    pub fn on_disk(path: impl Into<String>) -> Result<Self> {
        let adapter = SqliteAdapter::on_disk(path);
        adapter.connect()?;
        Ok(Database {
            adapter,
            registry: Registry::new(),
        })
    }

    pub fn adapter(&self) -> &SqliteAdapter {
        &self.adapter
    }

    pub fn store(&self) -> DocumentStore<'_> {
        DocumentStore::new(&self.adapter)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn close(&self) {
        self.adapter.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn opens_and_round_trips_through_the_store() {
        let db = Database::in_memory().unwrap();
        let id = db.store().insert_document("users", &json!({"name": "Ada"})).unwrap();
        let doc = db.store().find_document("users", id).unwrap().unwrap();
        assert_eq!(doc["name"], json!("Ada"));
    }
}

//! Table-name to record-type mapping used to resolve references at load
//! time. Owned by a [`crate::Database`] handle (rather than a process-wide
//! global) so that independent databases in one process stay isolated — see
//! the crate-level design notes.

use crate::database::Database;
use crate::error::Result;
use crate::reference::Reference;
use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Type-erased "load and fully resolve by id" hook, registered once per
/// bound record type.
type Loader = Arc<dyn Fn(&Database, i64, &mut HashSet<(String, i64)>) -> Result<Option<JsonValue>> + Send + Sync>;

#[derive(Default)]
pub struct Registry {
    loaders: RwLock<HashMap<String, Loader>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Registers (or replaces) the loader for `table`. Binding the same
    /// table to a new type replaces the prior entry.
    pub fn register(&self, table: impl Into<String>, loader: Loader) {
        self.loaders.write().insert(table.into(), loader);
    }

    pub fn is_registered(&self, table: &str) -> bool {
        self.loaders.read().contains_key(table)
    }

    /// Every table currently bound to a type, for callers that need to scan
    /// across all known record types (restrict-on-delete dependent checks).
    pub fn tables(&self) -> Vec<String> {
        self.loaders.read().keys().cloned().collect()
    }

    /// Walks `value` depth-first; any subtree structurally matching
    /// `{table, id}` is replaced with the fully resolved document for that
    /// reference, or left untouched (a broken reference) if no type is
    /// registered for the table or the row no longer exists. A single
    /// `in_flight` set, threaded through the whole walk, breaks cycles: a
    /// reference back to a row already being resolved is left as the raw
    /// `{table, id}` pair instead of recursing forever.
    pub fn resolve_tree(
        &self,
        db: &Database,
        value: &mut JsonValue,
        in_flight: &mut HashSet<(String, i64)>,
    ) {
        if Reference::is_reference_shape(value) {
            if let Some(reference) = Reference::from_value(value) {
                let key = (reference.table.clone(), reference.id);
                if in_flight.contains(&key) {
                    return;
                }
                let loader = self.loaders.read().get(&reference.table).cloned();
                match loader {
                    Some(loader) => {
                        in_flight.insert(key.clone());
                        let resolved = loader(db, reference.id, in_flight);
                        in_flight.remove(&key);
                        match resolved {
                            Ok(Some(doc)) => {
                                *value = doc;
                            }
                            Ok(None) => {
                                log::warn!(
                                    "sqler: broken reference to {}/{}",
                                    reference.table,
                                    reference.id
                                );
                            }
                            Err(e) => {
                                log::warn!(
                                    "sqler: failed to resolve reference to {}/{}: {e}",
                                    reference.table,
                                    reference.id
                                );
                            }
                        }
                    }
                    None => {
                        log::warn!(
                            "sqler: no type registered for table {}, leaving reference opaque",
                            reference.table
                        );
                    }
                }
                return;
            }
        }

        match value {
            JsonValue::Object(map) => {
                for v in map.values_mut() {
                    self.resolve_tree(db, v, in_flight);
                }
            }
            JsonValue::Array(items) => {
                for v in items.iter_mut() {
                    self.resolve_tree(db, v, in_flight);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_and_reports_presence() {
        let registry = Registry::new();
        assert!(!registry.is_registered("addresses"));
        registry.register("addresses", Arc::new(|_db, _id, _in_flight| Ok(None)));
        assert!(registry.is_registered("addresses"));
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A `{table, id}` pair denoting another record. Never an owning
/// relationship — the referring record stores only the pair, and resolution
/// is a lookup through the [`crate::registry::Registry`]. A reference with no
/// resolvable target is a broken reference: the engine does not repair it
/// and does not cascade deletes unless explicitly requested by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub table: String,
    pub id: i64,
}

impl Reference {
    pub fn new(table: impl Into<String>, id: i64) -> Self {
        Reference {
            table: table.into(),
            id,
        }
    }

    /// Returns whether `value` structurally matches a reference: a JSON
    /// object with exactly the reserved keys `table` and `id`, both of the
    /// right scalar type. Recognized wherever it appears inside a payload
    /// tree, at any depth.
    pub fn is_reference_shape(value: &JsonValue) -> bool {
        match value.as_object() {
            Some(map) => {
                map.len() == 2
                    && matches!(map.get("table"), Some(JsonValue::String(_)))
                    && matches!(map.get("id"), Some(n) if n.is_i64())
            }
            None => false,
        }
    }

    /// Parses a reference out of a JSON value already known to match
    /// [`is_reference_shape`].
    pub fn from_value(value: &JsonValue) -> Option<Reference> {
        let table = value.get("table")?.as_str()?.to_string();
        let id = value.get("id")?.as_i64()?;
        Some(Reference { table, id })
    }

    pub fn to_value(&self) -> JsonValue {
        serde_json::json!({"table": self.table, "id": self.id})
    }
}

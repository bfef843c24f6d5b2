//! Typed cross-reference fields. A plain [`crate::reference::Reference`] is
//! the wire shape; [`Linked`] additionally lets a field hold the hydrated
//! record once a query has resolved it, while still round-tripping to the
//! same `{table, id}` pair on the way back out.

use crate::database::Database;
use crate::error::{Result, SqlerError};
use crate::reference::Reference;
use crate::record::Model;
use serde::de::Error as DeError;
use serde::ser::Error as SerError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;

/// A cross-reference field that is either an unresolved `{table, id}` pair
/// or a hydrated record, depending on whether the query that produced it
/// resolved references (see [`crate::record::QuerySet::resolve`]).
#[derive(Debug, Clone)]
pub enum Linked<T> {
    Unresolved(Reference),
    Resolved(T),
}

impl<T: Model> Linked<T> {
    pub fn to(record: T) -> Self {
        Linked::Resolved(record)
    }

    pub fn reference(table: impl Into<String>, id: i64) -> Self {
        Linked::Unresolved(Reference::new(table, id))
    }

    pub fn get(&self) -> Option<&T> {
        match self {
            Linked::Resolved(t) => Some(t),
            Linked::Unresolved(_) => None,
        }
    }

    /// Returns the hydrated record, loading it from `db` if this field was
    /// left unresolved.
    pub fn load(&self, db: &Database) -> Result<T> {
        match self {
            Linked::Resolved(t) => Ok(t.clone()),
            Linked::Unresolved(r) => T::from_id(db, r.id),
        }
    }

    /// Saves the held record now if it is resolved and still unsaved, so a
    /// parent's own `save` can serialize this field as a reference instead
    /// of failing. A no-op for unresolved fields and for already-saved
    /// records. Meant to be called from a [`Model::encode_relations`]
    /// override, one line per `Linked` field that might still be unsaved.
    pub fn ensure_saved(&mut self, db: &Database) -> Result<()> {
        if let Linked::Resolved(t) = self {
            if t.id().is_none() {
                t.save(db)?;
            }
        }
        Ok(())
    }
}

/// Builds the `{table, id}` pair for an already-saved record, for callers
/// assembling a reference field by hand instead of through [`Linked`].
pub fn reference_for<T: Model>(record: &T) -> Result<Reference> {
    record
        .id()
        .map(|id| Reference::new(T::table_name(), id))
        .ok_or_else(|| SqlerError::UnsavedReferent {
            table: T::table_name().to_string(),
        })
}

impl<T: Model> Serialize for Linked<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Linked::Unresolved(r) => r.serialize(serializer),
            Linked::Resolved(t) => match t.id() {
                Some(id) => Reference::new(T::table_name(), id).serialize(serializer),
                None => Err(S::Error::custom(format!(
                    "cannot reference an unsaved record (missing id) in table {}",
                    T::table_name()
                ))),
            },
        }
    }
}

impl<'de, T: Model> Deserialize<'de> for Linked<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = JsonValue::deserialize(deserializer)?;
        if Reference::is_reference_shape(&value) {
            if let Some(r) = Reference::from_value(&value) {
                return Ok(Linked::Unresolved(r));
            }
        }
        let id = value.get("id").and_then(JsonValue::as_i64);
        let mut record: T = serde_json::from_value(value).map_err(DeError::custom)?;
        record.set_id(id);
        Ok(Linked::Resolved(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    struct Address {
        #[serde(skip)]
        id: Option<i64>,
        city: String,
    }

    impl Model for Address {
        fn table_name() -> &'static str {
            "addresses"
        }
        fn id(&self) -> Option<i64> {
            self.id
        }
        fn set_id(&mut self, id: Option<i64>) {
            self.id = id;
        }
    }

    #[test]
    fn unresolved_round_trips_as_plain_reference() {
        let linked: Linked<Address> = Linked::reference("addresses", 7);
        let value = serde_json::to_value(&linked).unwrap();
        assert_eq!(value, json!({"table": "addresses", "id": 7}));
        let back: Linked<Address> = serde_json::from_value(value).unwrap();
        assert!(matches!(back, Linked::Unresolved(r) if r.id == 7));
    }

    #[test]
    fn resolved_serializes_back_to_a_reference() {
        let mut addr = Address {
            id: None,
            city: "Kyoto".into(),
        };
        addr.set_id(Some(3));
        let linked = Linked::to(addr);
        let value = serde_json::to_value(&linked).unwrap();
        assert_eq!(value, json!({"table": "addresses", "id": 3}));
    }

    #[test]
    fn ensure_saved_saves_an_unsaved_resolved_record_in_place() {
        let db = Database::in_memory().unwrap();
        Address::bind(&db).unwrap();

        let addr = Address {
            id: None,
            city: "Kyoto".into(),
        };
        let mut linked = Linked::to(addr);
        linked.ensure_saved(&db).unwrap();
        assert!(linked.get().unwrap().id().is_some());

        let value = serde_json::to_value(&linked).unwrap();
        assert_eq!(value["table"], json!("addresses"));
    }

    #[test]
    fn serializing_an_unsaved_resolved_record_fails() {
        let addr = Address {
            id: None,
            city: "Kyoto".into(),
        };
        let linked = Linked::to(addr);
        assert!(serde_json::to_value(&linked).is_err());
    }

    #[test]
    fn deserializing_a_hydrated_object_captures_its_id() {
        let value = json!({"id": 9, "city": "Osaka"});
        let linked: Linked<Address> = serde_json::from_value(value).unwrap();
        match linked {
            Linked::Resolved(addr) => {
                assert_eq!(addr.id, Some(9));
                assert_eq!(addr.city, "Osaka");
            }
            Linked::Unresolved(_) => panic!("expected a resolved record"),
        }
    }
}

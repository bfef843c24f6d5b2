//! Active-record layer: typed documents bound to a table, queried and
//! persisted through a [`Database`] handle.

pub mod relation;
pub mod versioned;

pub use relation::Linked;

use crate::database::Database;
use crate::error::{BrokenReference, Result, SqlerError};
use crate::query::{Expression, Query};
use crate::reference::Reference;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;

/// A type bound to a table, with an optional row id. Implementors are
/// ordinary structs; this crate never generates or derives the impl, so
/// `id()`/`set_id()` are written out the way a hand-rolled ORM record would.
pub trait Model: Serialize + DeserializeOwned + Clone + Send + Sync + Sized + 'static {
    fn table_name() -> &'static str;
    fn id(&self) -> Option<i64>;
    fn set_id(&mut self, id: Option<i64>);

    /// Runs before a save. The default does nothing; types holding
    /// [`Linked`] fields that might still be unsaved should override this to
    /// call [`Linked::ensure_saved`] on each one, rather than failing at
    /// encode time.
    fn encode_relations(&mut self, _db: &Database) -> Result<()> {
        Ok(())
    }

    fn bind(db: &Database) -> Result<()> {
        bind::<Self>(db)
    }

    fn query(db: &Database) -> QuerySet<'_, Self> {
        QuerySet::new(db)
    }

    fn from_id(db: &Database, id: i64) -> Result<Self> {
        from_id::<Self>(db, id)
    }

    fn save(&mut self, db: &Database) -> Result<()> {
        save(db, self)
    }

    fn delete(&self, db: &Database) -> Result<()> {
        delete(db, self)
    }

    /// Like [`delete`](Self::delete), but refuses with
    /// [`SqlerError::ReferentialIntegrity`] if any bound record still holds
    /// a reference to this row.
    fn delete_restrict(&self, db: &Database) -> Result<()> {
        delete_restrict(db, self)
    }

    fn refresh(&mut self, db: &Database) -> Result<()> {
        refresh(db, self)
    }

    fn ensure_index(db: &Database, field: &str, unique: bool) -> Result<()> {
        db.store()
            .create_index(Self::table_name(), field, unique, None, None)
    }
}

fn strip_reserved_keys(value: &mut JsonValue) {
    if let JsonValue::Object(map) = value {
        map.remove("id");
        map.remove("_version");
    }
}

fn load_resolved<T: Model>(
    db: &Database,
    id: i64,
    in_flight: &mut HashSet<(String, i64)>,
) -> Result<Option<JsonValue>> {
    match db.store().find_document(T::table_name(), id)? {
        None => Ok(None),
        Some(mut doc) => {
            db.registry().resolve_tree(db, &mut doc, in_flight);
            Ok(Some(doc))
        }
    }
}

/// Registers `T` with `db`'s table and reference registry. Must be called
/// once per type before any reference to one of its rows can be resolved
/// out of another record's payload.
pub fn bind<T: Model>(db: &Database) -> Result<()> {
    db.store().ensure_table(T::table_name())?;
    db.registry().register(
        T::table_name(),
        Arc::new(|db, id, in_flight| load_resolved::<T>(db, id, in_flight)),
    );
    Ok(())
}

pub fn from_id<T: Model>(db: &Database, id: i64) -> Result<T> {
    let doc = load_resolved::<T>(db, id, &mut HashSet::new())?.ok_or_else(|| {
        SqlerError::NotFound {
            table: T::table_name().to_string(),
            id,
        }
    })?;
    Ok(serde_json::from_value(doc)?)
}

pub fn save<T: Model>(db: &Database, record: &mut T) -> Result<()> {
    record.encode_relations(db)?;
    let mut value = serde_json::to_value(&*record)?;
    strip_reserved_keys(&mut value);
    let id = db
        .store()
        .upsert_document(T::table_name(), record.id(), &value)?;
    record.set_id(Some(id));
    Ok(())
}

pub fn delete<T: Model>(db: &Database, record: &T) -> Result<()> {
    let id = record.id().ok_or_else(|| SqlerError::UnsavedOperation {
        op: "delete",
        table: T::table_name().to_string(),
    })?;
    db.store().delete_document(T::table_name(), id)
}

/// Scans every bound table for a row still referencing `(table, id)`, so a
/// restrict-on-delete check can refuse the delete instead of creating a
/// broken reference. Scope is every type bound via [`bind`] at the time of
/// the call — an unbound table referencing the row is invisible to this
/// check by construction, since there is no loader to iterate its rows.
fn find_dependent(db: &Database, table: &str, id: i64) -> Result<Option<BrokenReference>> {
    for other_table in db.registry().tables() {
        let rows = db
            .store()
            .execute_sql(&format!("SELECT id, data FROM {other_table}"), &[])?;
        for row in rows {
            if let Some(path) = find_reference_path(&row, table, id) {
                let row_id = row.get("id").and_then(JsonValue::as_i64).unwrap_or(0);
                return Ok(Some(BrokenReference {
                    table: other_table,
                    row_id,
                    path,
                    target_table: table.to_string(),
                    target_id: id,
                }));
            }
        }
    }
    Ok(None)
}

fn find_reference_path(value: &JsonValue, table: &str, id: i64) -> Option<String> {
    fn walk(value: &JsonValue, table: &str, id: i64, path: &mut Vec<String>) -> Option<String> {
        if Reference::is_reference_shape(value) {
            if let Some(r) = Reference::from_value(value) {
                if r.table == table && r.id == id {
                    return Some(path.join("."));
                }
            }
        }
        match value {
            JsonValue::Object(map) => {
                for (key, v) in map {
                    path.push(key.clone());
                    if let Some(found) = walk(v, table, id, path) {
                        return Some(found);
                    }
                    path.pop();
                }
            }
            JsonValue::Array(items) => {
                for (i, v) in items.iter().enumerate() {
                    path.push(i.to_string());
                    if let Some(found) = walk(v, table, id, path) {
                        return Some(found);
                    }
                    path.pop();
                }
            }
            _ => {}
        }
        None
    }
    walk(value, table, id, &mut Vec::new())
}

pub fn delete_restrict<T: Model>(db: &Database, record: &T) -> Result<()> {
    let id = record.id().ok_or_else(|| SqlerError::UnsavedOperation {
        op: "delete",
        table: T::table_name().to_string(),
    })?;
    if let Some(dependent) = find_dependent(db, T::table_name(), id)? {
        return Err(SqlerError::ReferentialIntegrity(dependent));
    }
    db.store().delete_document(T::table_name(), id)
}

pub fn refresh<T: Model>(db: &Database, record: &mut T) -> Result<()> {
    let id = record.id().ok_or_else(|| SqlerError::UnsavedOperation {
        op: "refresh",
        table: T::table_name().to_string(),
    })?;
    *record = from_id::<T>(db, id)?;
    Ok(())
}

/// A [`Query`] bound to a record type, hydrating rows into `T` and, unless
/// [`resolve(false)`](Self::resolve) is used, resolving any cross-references
/// found in the loaded payloads.
#[derive(Clone)]
pub struct QuerySet<'a, T> {
    query: Query<'a>,
    db: &'a Database,
    resolve: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, T: Model> QuerySet<'a, T> {
    pub fn new(db: &'a Database) -> Self {
        QuerySet {
            query: Query::new(T::table_name(), Some(db.adapter())),
            db,
            resolve: true,
            _marker: PhantomData,
        }
    }

    pub fn filter(&self, expression: Expression) -> Self {
        QuerySet {
            query: self.query.filter(expression),
            ..self.clone()
        }
    }

    pub fn exclude(&self, expression: Expression) -> Self {
        QuerySet {
            query: self.query.exclude(expression),
            ..self.clone()
        }
    }

    pub fn order_by(&self, field: impl Into<String>, desc: bool) -> Self {
        QuerySet {
            query: self.query.order_by(field, desc),
            ..self.clone()
        }
    }

    pub fn limit(&self, n: i64) -> Self {
        QuerySet {
            query: self.query.limit(n),
            ..self.clone()
        }
    }

    /// Opts out of reference resolution; matching rows come back with any
    /// cross-reference fields left as raw `{table, id}` pairs.
    pub fn resolve(&self, flag: bool) -> Self {
        QuerySet {
            resolve: flag,
            ..self.clone()
        }
    }

    pub fn count(&self) -> Result<i64> {
        self.query.count()
    }

    pub fn all(&self) -> Result<Vec<T>> {
        let mut docs = self.query.all_dicts()?;
        if self.resolve {
            for doc in &mut docs {
                self.db.registry().resolve_tree(self.db, doc, &mut HashSet::new());
            }
        }
        docs.into_iter()
            .map(|doc| Ok(serde_json::from_value(doc)?))
            .collect()
    }

    pub fn first(&self) -> Result<Option<T>> {
        Ok(self.limit(1).all()?.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Field;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct User {
        #[serde(skip)]
        id: Option<i64>,
        name: String,
        address: Linked<Address>,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
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

    impl Model for User {
        fn table_name() -> &'static str {
            "users"
        }
        fn id(&self) -> Option<i64> {
            self.id
        }
        fn set_id(&mut self, id: Option<i64>) {
            self.id = id;
        }
        fn encode_relations(&mut self, db: &Database) -> Result<()> {
            self.address.ensure_saved(db)
        }
    }

    #[test]
    fn save_from_id_and_delete_round_trip() {
        let db = Database::in_memory().unwrap();
        Address::bind(&db).unwrap();
        User::bind(&db).unwrap();

        let mut addr = Address {
            id: None,
            city: "Kyoto".into(),
        };
        addr.save(&db).unwrap();

        let mut user = User {
            id: None,
            name: "Alice".into(),
            address: Linked::to(addr.clone()),
        };
        user.save(&db).unwrap();
        let id = user.id().unwrap();

        let loaded = User::from_id(&db, id).unwrap();
        assert_eq!(loaded.name, "Alice");
        assert_eq!(loaded.address.get().unwrap().city, "Kyoto");

        loaded.delete(&db).unwrap();
        assert!(matches!(
            User::from_id(&db, id).unwrap_err(),
            SqlerError::NotFound { .. }
        ));
    }

    #[test]
    fn save_auto_saves_a_still_unsaved_nested_record() {
        let db = Database::in_memory().unwrap();
        Address::bind(&db).unwrap();
        User::bind(&db).unwrap();

        let addr = Address {
            id: None,
            city: "Nara".into(),
        };
        let mut user = User {
            id: None,
            name: "Dana".into(),
            address: Linked::to(addr),
        };
        user.save(&db).unwrap();

        assert!(user.address.get().unwrap().id().is_some());
        let loaded = User::from_id(&db, user.id().unwrap()).unwrap();
        assert_eq!(loaded.address.get().unwrap().city, "Nara");
    }

    #[test]
    fn delete_restrict_refuses_while_a_dependent_exists() {
        let db = Database::in_memory().unwrap();
        Address::bind(&db).unwrap();
        User::bind(&db).unwrap();

        let mut addr = Address {
            id: None,
            city: "Kyoto".into(),
        };
        addr.save(&db).unwrap();
        let mut user = User {
            id: None,
            name: "Alice".into(),
            address: Linked::to(addr.clone()),
        };
        user.save(&db).unwrap();

        let err = addr.delete_restrict(&db).unwrap_err();
        match err {
            SqlerError::ReferentialIntegrity(broken) => {
                assert_eq!(broken.table, "users");
                assert_eq!(broken.target_table, "addresses");
                assert_eq!(broken.target_id, addr.id().unwrap());
            }
            other => panic!("expected ReferentialIntegrity, got {other:?}"),
        }

        user.delete(&db).unwrap();
        addr.delete_restrict(&db).unwrap();
    }

    #[test]
    fn query_resolves_references_by_default_and_can_opt_out() {
        let db = Database::in_memory().unwrap();
        Address::bind(&db).unwrap();
        User::bind(&db).unwrap();

        let mut addr = Address {
            id: None,
            city: "Osaka".into(),
        };
        addr.save(&db).unwrap();
        let mut user = User {
            id: None,
            name: "Bob".into(),
            address: Linked::to(addr),
        };
        user.save(&db).unwrap();

        let resolved = User::query(&db)
            .filter(Field::new("name").eq("Bob"))
            .first()
            .unwrap()
            .unwrap();
        assert!(matches!(resolved.address, Linked::Resolved(_)));

        let raw = User::query(&db)
            .resolve(false)
            .filter(Field::new("name").eq("Bob"))
            .first()
            .unwrap()
            .unwrap();
        assert!(matches!(raw.address, Linked::Unresolved(_)));
    }

    #[test]
    fn refresh_reloads_from_storage() {
        let db = Database::in_memory().unwrap();
        Address::bind(&db).unwrap();
        let mut addr = Address {
            id: None,
            city: "Kyoto".into(),
        };
        addr.save(&db).unwrap();
        let id = addr.id().unwrap();

        db.store()
            .upsert_document("addresses", Some(id), &serde_json::json!({"city": "Nara"}))
            .unwrap();
        addr.refresh(&db).unwrap();
        assert_eq!(addr.city, "Nara");
    }
}

//! `sqler` is a small document-oriented persistence engine over embedded
//! SQLite: records are JSON payloads in a `(id, data)` table, queried through
//! a chainable expression builder that compiles to `json_extract`/`json_each`
//! SQL rather than a full query language of its own.
//!
//! The [`adapter`] module owns the connection and pragmas; [`store`] adds
//! table-level CRUD including optimistic-concurrency upserts; [`query`]
//! compiles filter expressions (including array-any traversal and
//! cross-record predicates) to SQL; [`record`] layers a typed, bindable
//! active-record API on top, with [`record::versioned`] adding compare-and-
//! swap saves with configurable retry. [`reference`] and [`registry`] make
//! `{table, id}` cross-references resolvable back into full records.
//!
//! ```no_run
//! use sqler::{Database, Model};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct User {
//!     #[serde(skip)]
//!     id: Option<i64>,
//!     name: String,
//! }
//!
//! impl Model for User {
//!     fn table_name() -> &'static str { "users" }
//!     fn id(&self) -> Option<i64> { self.id }
//!     fn set_id(&mut self, id: Option<i64>) { self.id = id; }
//! }
//!
//! # fn main() -> sqler::error::Result<()> {
//! let db = Database::in_memory()?;
//! User::bind(&db)?;
//! let mut user = User { id: None, name: "Ada".into() };
//! user.save(&db)?;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod database;
pub mod error;
pub mod query;
pub mod record;
pub mod reference;
pub mod registry;
pub mod store;

pub use adapter::SqliteAdapter;
pub use database::Database;
pub use error::{Result, SqlerError};
pub use query::{Expression, Field, ModelField, Query};
pub use record::{Linked, Model, QuerySet};
pub use reference::Reference;
pub use registry::Registry;
pub use store::DocumentStore;

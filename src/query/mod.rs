//! The query language: an immutable [`Expression`] algebra, a [`Field`]
//! proxy that compiles JSON-path predicates, and a chainable [`Query`]
//! builder.

mod expression;
mod field;
mod query;

pub use expression::Expression;
pub use field::{Field, ModelField};
pub use query::Query;

use super::expression::Expression;
use crate::adapter::SqliteAdapter;
use crate::error::{Result, SqlerError};
use serde_json::Value as JsonValue;

/// A chainable, immutable query over one table. Every builder method returns
/// a new [`Query`]; the original is left untouched.
#[derive(Clone)]
pub struct Query<'a> {
    table: String,
    adapter: Option<&'a SqliteAdapter>,
    expression: Option<Expression>,
    order: Option<String>,
    desc: bool,
    limit: Option<i64>,
}

impl<'a> Query<'a> {
    pub fn new(table: impl Into<String>, adapter: Option<&'a SqliteAdapter>) -> Self {
        Query {
            table: table.into(),
            adapter,
            expression: None,
            order: None,
            desc: false,
            limit: None,
        }
    }

    /// ANDs `expression` into the current filter.
    pub fn filter(&self, expression: Expression) -> Query<'a> {
        let new_expression = match &self.expression {
            None => expression,
            Some(existing) => existing.and(&expression),
        };
        Query {
            expression: Some(new_expression),
            ..self.clone()
        }
    }

    /// Equivalent to `filter(expression.negate())`.
    pub fn exclude(&self, expression: Expression) -> Query<'a> {
        self.filter(expression.negate())
    }

    pub fn order_by(&self, field: impl Into<String>, desc: bool) -> Query<'a> {
        Query {
            order: Some(field.into()),
            desc,
            ..self.clone()
        }
    }

    pub fn limit(&self, n: i64) -> Query<'a> {
        Query {
            limit: Some(n),
            ..self.clone()
        }
    }

    fn build(&self, include_id: bool) -> (String, Vec<rusqlite::types::Value>) {
        let where_clause = self
            .expression
            .as_ref()
            .map(|e| format!("WHERE {}", e.sql()))
            .unwrap_or_default();
        let order_clause = self
            .order
            .as_ref()
            .map(|f| {
                format!(
                    "ORDER BY json_extract(data, '$.{f}'){}",
                    if self.desc { " DESC" } else { "" }
                )
            })
            .unwrap_or_default();
        let limit_clause = self
            .limit
            .map(|n| format!("LIMIT {n}"))
            .unwrap_or_default();
        let select = if include_id { "id, data" } else { "data" };
        let sql = format!(
            "SELECT {select} FROM {} {where_clause} {order_clause} {limit_clause}",
            self.table
        );
        let sql = sql.split_whitespace().collect::<Vec<_>>().join(" ");
        let params = self
            .expression
            .as_ref()
            .map(|e| e.params().to_vec())
            .unwrap_or_default();
        (sql, params)
    }

    /// The SQL this query currently compiles to (raw `data`-only select).
    pub fn sql(&self) -> String {
        self.build(false).0
    }

    /// The parameters this query currently compiles with.
    pub fn params(&self) -> Vec<rusqlite::types::Value> {
        self.build(false).1
    }

    fn adapter(&self) -> Result<&SqliteAdapter> {
        self.adapter.ok_or(SqlerError::NoAdapter)
    }

    /// Runs the query; returns payloads as stored (no `id` attached).
    pub fn all(&self) -> Result<Vec<JsonValue>> {
        let (sql, params) = self.build(false);
        let cur = self.adapter()?.execute(&sql, &params)?;
        cur.fetch_all()
            .into_iter()
            .map(|row| match row.first() {
                Some(rusqlite::types::Value::Text(s)) => {
                    Ok(serde_json::from_str::<JsonValue>(s)?)
                }
                other => Err(SqlerError::Other(format!(
                    "expected JSON text column, found {other:?}"
                ))),
            })
            .collect()
    }

    /// Runs the query limited to one row; returns the first payload, if any.
    pub fn first(&self) -> Result<Option<JsonValue>> {
        Ok(self.limit(1).all()?.into_iter().next())
    }

    /// Runs the query; returns parsed documents with `id` attached.
    pub fn all_dicts(&self) -> Result<Vec<JsonValue>> {
        let (sql, params) = self.build(true);
        let cur = self.adapter()?.execute(&sql, &params)?;
        cur.fetch_all()
            .into_iter()
            .map(|row| {
                let id = match row.first() {
                    Some(rusqlite::types::Value::Integer(i)) => *i,
                    other => {
                        return Err(SqlerError::Other(format!(
                            "expected INTEGER id column, found {other:?}"
                        )))
                    }
                };
                let data = match row.get(1) {
                    Some(rusqlite::types::Value::Text(s)) => s.clone(),
                    other => {
                        return Err(SqlerError::Other(format!(
                            "expected JSON text column, found {other:?}"
                        )))
                    }
                };
                let mut doc: JsonValue = serde_json::from_str(&data)?;
                if let JsonValue::Object(map) = &mut doc {
                    map.insert("id".to_string(), JsonValue::Number(id.into()));
                }
                Ok(doc)
            })
            .collect()
    }

    /// Runs the query limited to one row; returns the first hydrated dict.
    pub fn first_dict(&self) -> Result<Option<JsonValue>> {
        Ok(self.limit(1).all_dicts()?.into_iter().next())
    }

    /// Returns the count of matching rows, rewriting the `SELECT` prefix to
    /// `SELECT count(*)`.
    pub fn count(&self) -> Result<i64> {
        let (sql, params) = self.build(false);
        let count_sql = sql.replacen("SELECT data", "SELECT count(*)", 1);
        let cur = self.adapter()?.execute(&count_sql, &params)?;
        match cur.fetch_one().and_then(|row| row.into_iter().next()) {
            Some(rusqlite::types::Value::Integer(n)) => Ok(n),
            _ => Ok(0),
        }
    }
}

use rusqlite::types::Value as Param;

/// A SQL fragment paired with its ordered parameter list. Expressions are
/// immutable: every combinator allocates a new value rather than mutating
/// either operand.
#[derive(Debug, Clone)]
pub struct Expression {
    pub(crate) sql: String,
    pub(crate) params: Vec<Param>,
}

impl Expression {
    /// Builds a raw expression from a SQL fragment and its parameters.
    /// `sql` should read like `"json_extract(data, '$.x') = ?"`.
    pub fn raw(sql: impl Into<String>, params: Vec<Param>) -> Self {
        Expression {
            sql: sql.into(),
            params,
        }
    }

    /// The literal-false expression with no parameters, used for `isin([])`.
    pub fn always_false() -> Self {
        Expression::raw("0", vec![])
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// `(self) AND (other)`; params are concatenated in order.
    pub fn and(&self, other: &Expression) -> Expression {
        let mut params = self.params.clone();
        params.extend(other.params.clone());
        Expression {
            sql: format!("({}) AND ({})", self.sql, other.sql),
            params,
        }
    }

    /// `(self) OR (other)`; params are concatenated in order.
    pub fn or(&self, other: &Expression) -> Expression {
        let mut params = self.params.clone();
        params.extend(other.params.clone());
        Expression {
            sql: format!("({}) OR ({})", self.sql, other.sql),
            params,
        }
    }

    /// `NOT (self)`.
    pub fn negate(&self) -> Expression {
        Expression {
            sql: format!("NOT ({})", self.sql),
            params: self.params.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_concatenates_params_and_does_not_mutate_operands() {
        let a = Expression::raw("a = ?", vec![Param::Integer(1)]);
        let b = Expression::raw("b = ?", vec![Param::Integer(2)]);
        let a_sql_before = a.sql().to_string();
        let combined = a.and(&b);
        assert_eq!(combined.sql(), "(a = ?) AND (b = ?)");
        assert_eq!(
            combined.params(),
            &[Param::Integer(1), Param::Integer(2)]
        );
        assert_eq!(a.sql(), a_sql_before);
        assert_eq!(a.params(), &[Param::Integer(1)]);
        assert_eq!(b.params(), &[Param::Integer(2)]);
    }

    #[test]
    fn negate_wraps_without_touching_params() {
        let a = Expression::raw("a = ?", vec![Param::Integer(1)]);
        let not_a = a.negate();
        assert_eq!(not_a.sql(), "NOT (a = ?)");
        assert_eq!(not_a.params(), a.params());
    }

    #[test]
    fn always_false_has_no_params() {
        let e = Expression::always_false();
        assert_eq!(e.sql(), "0");
        assert!(e.params().is_empty());
    }
}

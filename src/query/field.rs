use super::expression::Expression;
use crate::record::Model;
use crate::registry::Registry;
use rusqlite::types::Value as Param;

/// One segment of a JSON path: a key or an array index.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Key(String),
    Index(i64),
}

impl From<&str> for Segment {
    fn from(s: &str) -> Self {
        Segment::Key(s.to_string())
    }
}

impl From<String> for Segment {
    fn from(s: String) -> Self {
        Segment::Key(s)
    }
}

impl From<i64> for Segment {
    fn from(i: i64) -> Self {
        Segment::Index(i)
    }
}

impl From<i32> for Segment {
    fn from(i: i32) -> Self {
        Segment::Index(i as i64)
    }
}

/// Converts comparison values into SQL parameters.
pub trait IntoParam {
    fn into_param(self) -> Param;
}

macro_rules! impl_into_param_int {
    ($($t:ty),*) => {
        $(impl IntoParam for $t {
            fn into_param(self) -> Param {
                Param::Integer(self as i64)
            }
        })*
    };
}
impl_into_param_int!(i8, i16, i32, i64, u8, u16, u32);

impl IntoParam for f64 {
    fn into_param(self) -> Param {
        Param::Real(self)
    }
}

impl IntoParam for bool {
    fn into_param(self) -> Param {
        Param::Integer(if self { 1 } else { 0 })
    }
}

impl IntoParam for &str {
    fn into_param(self) -> Param {
        Param::Text(self.to_string())
    }
}

impl IntoParam for String {
    fn into_param(self) -> Param {
        Param::Text(self)
    }
}

fn needs_quoting(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return true,
    }
    !chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn json_path(path: &[Segment]) -> String {
    let mut out = String::from("$");
    for segment in path {
        match segment {
            Segment::Index(i) => out.push_str(&format!("[{i}]")),
            Segment::Key(k) if needs_quoting(k) => {
                let escaped = k.replace('"', "\\\"");
                out.push_str(&format!(".\"{escaped}\""));
            }
            Segment::Key(k) => out.push_str(&format!(".{k}")),
        }
    }
    out
}

/// One `.any()` marker in a field chain: the alias it was assigned and the
/// array-valued key it traverses.
#[derive(Debug, Clone)]
struct AnyMarker {
    alias: char,
    array_key: String,
}

/// A proxy for a JSON path into the `data` column. Builds comparison,
/// membership, and pattern predicates, and supports array-any traversal via
/// [`Field::any`].
#[derive(Debug, Clone)]
pub struct Field {
    path: Vec<Segment>,
    alias_stack: Vec<AnyMarker>,
}

impl Field {
    /// Starts a field proxy at a single top-level key.
    pub fn new(key: impl Into<Segment>) -> Self {
        Field {
            path: vec![key.into()],
            alias_stack: Vec::new(),
        }
    }

    /// Starts a field proxy over a full path (nested keys/indexes).
    pub fn path(segments: impl IntoIterator<Item = Segment>) -> Self {
        Field {
            path: segments.into_iter().collect(),
            alias_stack: Vec::new(),
        }
    }

    /// Goes one key/index deeper.
    pub fn get(&self, segment: impl Into<Segment>) -> Field {
        let mut path = self.path.clone();
        path.push(segment.into());
        Field {
            path,
            alias_stack: self.alias_stack.clone(),
        }
    }

    /// Marks the current (array-typed) path segment for element-level
    /// predicates. Each call allocates a fresh alphabetic alias (`a`, `b`,
    /// …); a later comparison on a chained path compiles into a correlated
    /// `EXISTS` with one `json_each`/`JOIN` per marker.
    pub fn any(&self) -> Field {
        let alias = char::from(b'a' + self.alias_stack.len() as u8);
        let array_key = match self.path.last() {
            Some(Segment::Key(k)) => k.clone(),
            Some(Segment::Index(i)) => i.to_string(),
            None => String::new(),
        };
        let mut alias_stack = self.alias_stack.clone();
        alias_stack.push(AnyMarker { alias, array_key });
        Field {
            path: self.path.clone(),
            alias_stack,
        }
    }

    fn compare(&self, op: &str, value: impl IntoParam) -> Expression {
        let param = value.into_param();
        if self.alias_stack.is_empty() {
            let expr = format!("json_extract(data, '{}') {op} ?", json_path(&self.path));
            Expression::raw(expr, vec![param])
        } else {
            self.compile_any_exists(op, param)
        }
    }

    fn compile_any_exists(&self, op: &str, param: Param) -> Expression {
        let first_array_key = &self.alias_stack[0].array_key;
        let idx0 = self
            .path
            .iter()
            .position(|s| matches!(s, Segment::Key(k) if k == first_array_key))
            .unwrap_or(0);
        let base = &self.path[..idx0];
        let mut base_json = String::from("$");
        for seg in base {
            match seg {
                Segment::Key(k) => base_json.push_str(&format!(".{k}")),
                Segment::Index(i) => base_json.push_str(&format!("[{i}]")),
            }
        }
        base_json.push_str(&format!(".{first_array_key}"));

        let first_alias = self.alias_stack[0].alias;
        let mut joins = vec![format!(
            "json_each(json_extract(data, '{base_json}')) AS {first_alias}"
        )];
        let mut prev_alias = first_alias;
        for marker in &self.alias_stack[1..] {
            joins.push(format!(
                "json_each(json_extract({prev_alias}.value, '$.{}')) AS {}",
                marker.array_key, marker.alias
            ));
            prev_alias = marker.alias;
        }

        let last_field = match self.path.last() {
            Some(Segment::Key(k)) => k.clone(),
            Some(Segment::Index(i)) => i.to_string(),
            None => String::new(),
        };
        let from_join = joins.join(" JOIN ");
        let sql = format!(
            "EXISTS (SELECT 1 FROM {from_join} WHERE json_extract({prev_alias}.value, '$.{last_field}') {op} ?)"
        );
        Expression::raw(sql, vec![param])
    }

    pub fn eq(&self, value: impl IntoParam) -> Expression {
        self.compare("=", value)
    }

    pub fn ne(&self, value: impl IntoParam) -> Expression {
        self.compare("!=", value)
    }

    pub fn lt(&self, value: impl IntoParam) -> Expression {
        self.compare("<", value)
    }

    pub fn le(&self, value: impl IntoParam) -> Expression {
        self.compare("<=", value)
    }

    pub fn gt(&self, value: impl IntoParam) -> Expression {
        self.compare(">", value)
    }

    pub fn ge(&self, value: impl IntoParam) -> Expression {
        self.compare(">=", value)
    }

    /// `EXISTS(SELECT 1 FROM json_each(data, '<path>') WHERE json_each.value = ?)`
    pub fn contains(&self, value: impl IntoParam) -> Expression {
        let path = json_path(&self.path);
        let sql = format!(
            "EXISTS (SELECT 1 FROM json_each(data, '{path}') WHERE json_each.value = ?)"
        );
        Expression::raw(sql, vec![value.into_param()])
    }

    /// Membership against a list of values. An empty list yields the
    /// literal-false expression `0` with no parameters, so it composes
    /// cleanly under AND/OR regardless of stored data.
    pub fn isin(&self, values: Vec<impl IntoParam>) -> Expression {
        if values.is_empty() {
            return Expression::always_false();
        }
        let path = json_path(&self.path);
        let placeholders = vec!["?"; values.len()].join(", ");
        let sql = format!(
            "EXISTS (SELECT 1 FROM json_each(data, '{path}') WHERE json_each.value IN ({placeholders}))"
        );
        let params = values.into_iter().map(IntoParam::into_param).collect();
        Expression::raw(sql, params)
    }

    /// `json_extract(data, '<path>') LIKE ?`
    pub fn like(&self, pattern: impl Into<String>) -> Expression {
        let path = json_path(&self.path);
        let sql = format!("json_extract(data, '{path}') LIKE ?");
        Expression::raw(sql, vec![Param::Text(pattern.into())])
    }
}

/// A model-aware field for predicates that cross a reference attribute. The
/// first path segment names the reference field (e.g. `"address"`); the
/// remainder is the JSON path inside the referenced table's document.
pub struct ModelField {
    outer_table: String,
    ref_field: String,
    ref_table: String,
    rest: Vec<Segment>,
}

impl ModelField {
    /// `outer_table`/`outer_ref_field` describe the referring side;
    /// `ref_table` is the table the reference points at. For the common case
    /// where the caller already knows both names; prefer
    /// [`ModelField::for_field`] when the target table should be resolved
    /// through the registry instead.
    pub fn new(
        outer_table: impl Into<String>,
        ref_field: impl Into<String>,
        ref_table: impl Into<String>,
        rest: Vec<Segment>,
    ) -> Self {
        ModelField {
            outer_table: outer_table.into(),
            ref_field: ref_field.into(),
            ref_table: ref_table.into(),
            rest,
        }
    }

    /// Builds a cross-reference field for `Outer::table_name()`'s
    /// `ref_field` attribute, resolving the referenced table from `registry`
    /// rather than requiring the caller to already know it. Falls back to
    /// default pluralization of the field name (`address` -> `addresses`)
    /// when the registry has no type bound under that guess.
    pub fn for_field<Outer: Model>(
        ref_field: impl Into<String>,
        registry: &Registry,
        rest: Vec<Segment>,
    ) -> Self {
        let ref_field = ref_field.into();
        let guess = format!("{ref_field}s");
        let ref_table = if registry.is_registered(&guess) {
            guess
        } else if registry.is_registered(&ref_field) {
            ref_field.clone()
        } else {
            guess
        };
        ModelField {
            outer_table: Outer::table_name().to_string(),
            ref_field,
            ref_table,
            rest,
        }
    }

    fn compare(&self, op: &str, value: impl IntoParam) -> Expression {
        let ref_json = format!("$.{}.id", self.ref_field);
        let where_right = if self.rest.is_empty() {
            format!("r.id {op} ?")
        } else {
            format!("json_extract(r.data, '{}') {op} ?", json_path(&self.rest))
        };
        let sql = format!(
            "EXISTS (SELECT 1 FROM {} r WHERE r.id = json_extract({}.data, '{}') AND {})",
            self.ref_table, self.outer_table, ref_json, where_right
        );
        Expression::raw(sql, vec![value.into_param()])
    }

    pub fn eq(&self, value: impl IntoParam) -> Expression {
        self.compare("=", value)
    }

    pub fn ne(&self, value: impl IntoParam) -> Expression {
        self.compare("!=", value)
    }

    pub fn lt(&self, value: impl IntoParam) -> Expression {
        self.compare("<", value)
    }

    pub fn le(&self, value: impl IntoParam) -> Expression {
        self.compare("<=", value)
    }

    pub fn gt(&self, value: impl IntoParam) -> Expression {
        self.compare(">", value)
    }

    pub fn ge(&self, value: impl IntoParam) -> Expression {
        self.compare(">=", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_eq_compiles_to_json_extract() {
        let f = Field::new("flag");
        let e = f.eq(true);
        assert_eq!(e.sql(), "json_extract(data, '$.flag') = ?");
        assert_eq!(e.params(), &[Param::Integer(1)]);
    }

    #[test]
    fn nested_path_quotes_non_identifier_keys() {
        let f = Field::new("level1").get("weird key");
        let e = f.lt(50);
        assert_eq!(
            e.sql(),
            "json_extract(data, '$.level1.\"weird key\"') < ?"
        );
    }

    #[test]
    fn index_segment_compiles_to_brackets() {
        let f = Field::new("array1").get(3i64);
        let e = f.eq(123);
        assert_eq!(e.sql(), "json_extract(data, '$.array1[3]') = ?");
    }

    #[test]
    fn contains_compiles_to_json_each_exists() {
        let f = Field::new("tags");
        let e = f.contains("red");
        assert_eq!(
            e.sql(),
            "EXISTS (SELECT 1 FROM json_each(data, '$.tags') WHERE json_each.value = ?)"
        );
    }

    #[test]
    fn isin_empty_is_always_false() {
        let f = Field::new("type");
        let e = f.isin(Vec::<&str>::new());
        assert_eq!(e.sql(), "0");
        assert!(e.params().is_empty());
    }

    #[test]
    fn isin_nonempty_builds_placeholders() {
        let f = Field::new("tags");
        let e = f.isin(vec!["red", "green"]);
        assert!(e.sql().contains("IN (?, ?)"));
        assert_eq!(e.params().len(), 2);
    }

    #[test]
    fn single_any_compiles_to_one_join() {
        let f = Field::new("arr").any().get("val");
        let e = f.eq(5);
        assert_eq!(
            e.sql(),
            "EXISTS (SELECT 1 FROM json_each(json_extract(data, '$.arr')) AS a WHERE json_extract(a.value, '$.val') = ?)"
        );
    }

    #[test]
    fn nested_any_compiles_to_chained_joins() {
        let f = Field::new("level1").any().get("arr2").any().get("score");
        let e = f.gt(50);
        assert_eq!(
            e.sql(),
            "EXISTS (SELECT 1 FROM json_each(json_extract(data, '$.level1')) AS a JOIN json_each(json_extract(a.value, '$.arr2')) AS b WHERE json_extract(b.value, '$.score') > ?)"
        );
    }

    #[test]
    fn model_field_compiles_correlated_exists() {
        let f = ModelField::new("users", "address", "addresses", vec![Segment::Key("city".into())]);
        let e = f.eq("Kyoto");
        assert_eq!(
            e.sql(),
            "EXISTS (SELECT 1 FROM addresses r WHERE r.id = json_extract(users.data, '$.address.id') AND json_extract(r.data, '$.city') = ?)"
        );
    }

    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    struct User {
        #[serde(skip)]
        id: Option<i64>,
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
    }

    #[test]
    fn for_field_resolves_ref_table_from_the_registry() {
        let registry = Registry::new();
        registry.register(
            "addresses",
            std::sync::Arc::new(|_db, _id, _in_flight| Ok(None)),
        );
        let f = ModelField::for_field::<User>("address", &registry, vec![Segment::Key("city".into())]);
        let e = f.eq("Kyoto");
        assert_eq!(
            e.sql(),
            "EXISTS (SELECT 1 FROM addresses r WHERE r.id = json_extract(users.data, '$.address.id') AND json_extract(r.data, '$.city') = ?)"
        );
    }

    #[test]
    fn for_field_falls_back_to_pluralization_when_unregistered() {
        let registry = Registry::new();
        let f = ModelField::for_field::<User>("address", &registry, vec![Segment::Key("city".into())]);
        let e = f.eq("Kyoto");
        assert!(e.sql().starts_with("EXISTS (SELECT 1 FROM addresses r"));
    }
}

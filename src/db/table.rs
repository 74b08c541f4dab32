//! Destination table specifications and typed row values

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// A schema-qualified table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableRef {
    pub schema: &'static str,
    pub name: &'static str,
}

impl TableRef {
    pub const fn new(schema: &'static str, name: &'static str) -> Self {
        Self { schema, name }
    }

    /// `"schema"."name"`, safe to splice into SQL.
    pub fn quoted(&self) -> String {
        format!("{}.{}", quote_ident(self.schema), quote_ident(self.name))
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// What happens when an inserted row collides with an existing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Keep the row already stored.
    PreserveFirst,
    /// Overwrite the descriptive (non-key) columns.
    UpdateCatalog,
    /// Delete every stored row of the batch's parents, then insert.
    ReplaceChildren,
    /// Plain insert. Only for tables emptied by the cascade reset.
    Append,
}

/// Flush order inside one commit: parents are always written first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FlushStage {
    Ghost,
    Catalog,
    Main,
    Child,
}

#[derive(Debug, Clone, Copy)]
pub struct ForeignKey {
    pub column: &'static str,
    pub references: TableRef,
    pub ref_column: &'static str,
}

impl ForeignKey {
    pub const fn new(column: &'static str, references: TableRef, ref_column: &'static str) -> Self {
        Self {
            column,
            references,
            ref_column,
        }
    }
}

/// Static description of one destination table as this tool writes it.
#[derive(Debug)]
pub struct TableSpec {
    pub table: TableRef,
    pub columns: &'static [&'static str],
    pub key: &'static [&'static str],
    pub policy: ConflictPolicy,
    pub stage: FlushStage,
    /// Column holding the owning main record's key, for `ReplaceChildren`.
    pub parent_column: Option<&'static str>,
    pub foreign_keys: &'static [ForeignKey],
}

impl TableSpec {
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| *c == column)
    }

    /// Conflict key of a row as a single string, or `None` when the table has
    /// no key or any key column is NULL (NULLs never collide).
    pub fn key_text(&self, row: &[SqlValue]) -> Option<String> {
        if self.key.is_empty() {
            return None;
        }
        let mut parts = Vec::with_capacity(self.key.len());
        for column in self.key {
            let value = self.column_index(column).and_then(|i| row.get(i))?;
            parts.push(value.key_text()?);
        }
        Some(parts.join("\u{1f}"))
    }

    pub fn parent_text(&self, row: &[SqlValue]) -> Option<String> {
        let index = self.column_index(self.parent_column?)?;
        row.get(index).and_then(SqlValue::key_text)
    }

    pub fn non_key_columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns
            .iter()
            .copied()
            .filter(move |c| !self.key.contains(c))
    }
}

/// A typed, nullable column value. Keeping the type on NULLs lets the
/// PostgreSQL driver bind them with the right parameter type.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(Option<String>),
    Bool(Option<bool>),
    Int(Option<i64>),
    Float(Option<f64>),
    Timestamp(Option<DateTime<Utc>>),
    Json(Option<Value>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        match self {
            SqlValue::Text(v) => v.is_none(),
            SqlValue::Bool(v) => v.is_none(),
            SqlValue::Int(v) => v.is_none(),
            SqlValue::Float(v) => v.is_none(),
            SqlValue::Timestamp(v) => v.is_none(),
            SqlValue::Json(v) => v.is_none(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(Some(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Comparable text form, used for keys and reference checks.
    pub fn key_text(&self) -> Option<String> {
        match self {
            SqlValue::Text(v) => v.clone(),
            SqlValue::Bool(v) => v.map(|b| b.to_string()),
            SqlValue::Int(v) => v.map(|i| i.to_string()),
            SqlValue::Float(v) => v.map(|f| f.to_string()),
            SqlValue::Timestamp(v) => v.map(|t| t.to_rfc3339()),
            SqlValue::Json(v) => v.as_ref().map(|j| j.to_string()),
        }
    }
}

impl From<Option<String>> for SqlValue {
    fn from(v: Option<String>) -> Self {
        SqlValue::Text(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(Some(v))
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(Some(v.to_string()))
    }
}

impl From<Option<bool>> for SqlValue {
    fn from(v: Option<bool>) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(Some(v))
    }
}

impl From<Option<i64>> for SqlValue {
    fn from(v: Option<i64>) -> Self {
        SqlValue::Int(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(Some(v))
    }
}

impl From<Option<f64>> for SqlValue {
    fn from(v: Option<f64>) -> Self {
        SqlValue::Float(v)
    }
}

impl From<Option<DateTime<Utc>>> for SqlValue {
    fn from(v: Option<DateTime<Utc>>) -> Self {
        SqlValue::Timestamp(v)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        SqlValue::Timestamp(Some(v))
    }
}

impl From<Option<Value>> for SqlValue {
    fn from(v: Option<Value>) -> Self {
        SqlValue::Json(v)
    }
}

pub type Row = Vec<SqlValue>;

/// A named-field row struct bound to one destination table.
pub trait Record {
    fn table() -> &'static TableSpec;
    fn into_row(self) -> Row;
}

/// Declare a row struct whose field names are its table's columns, in order.
/// Generates `COLUMNS` for the table spec and the `Record` impl, so a row can
/// never disagree with its table's shape.
#[macro_export]
macro_rules! table_record {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident in $spec:path {
            $($field:ident : $ty:ty),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        $vis struct $name {
            $(pub $field: $ty),*
        }

        impl $name {
            pub const COLUMNS: &'static [&'static str] = &[$(stringify!($field)),*];
        }

        impl $crate::db::Record for $name {
            fn table() -> &'static $crate::db::TableSpec {
                &$spec
            }

            fn into_row(self) -> $crate::db::Row {
                vec![$($crate::db::SqlValue::from(self.$field)),*]
            }
        }
    };
}

/// Collapse rows that share a conflict key, as one statement must not touch
/// a key twice. `UpdateCatalog` keeps the last version at the first
/// position; every other policy keeps the first occurrence.
pub fn dedup_rows(spec: &TableSpec, rows: Vec<Row>) -> Vec<Row> {
    if spec.key.is_empty() {
        return rows;
    }
    match spec.policy {
        ConflictPolicy::UpdateCatalog => {
            let mut positions: HashMap<String, usize> = HashMap::new();
            let mut out: Vec<Row> = Vec::with_capacity(rows.len());
            for row in rows {
                match spec.key_text(&row) {
                    Some(key) => match positions.get(&key) {
                        Some(&i) => out[i] = row,
                        None => {
                            positions.insert(key, out.len());
                            out.push(row);
                        }
                    },
                    None => out.push(row),
                }
            }
            out
        }
        _ => {
            let mut anonymous = 0usize;
            rows.into_iter()
                .unique_by(|row| {
                    spec.key_text(row).unwrap_or_else(|| {
                        anonymous += 1;
                        format!("\u{0}{}", anonymous)
                    })
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static PAIRS: TableSpec = TableSpec {
        table: TableRef::new("t", "pairs"),
        columns: &["id", "name"],
        key: &["id"],
        policy: ConflictPolicy::PreserveFirst,
        stage: FlushStage::Main,
        parent_column: None,
        foreign_keys: &[],
    };

    static CATALOG: TableSpec = TableSpec {
        table: TableRef::new("t", "catalog"),
        columns: &["id", "name"],
        key: &["id"],
        policy: ConflictPolicy::UpdateCatalog,
        stage: FlushStage::Catalog,
        parent_column: None,
        foreign_keys: &[],
    };

    fn row(id: Option<&str>, name: &str) -> Row {
        vec![SqlValue::Text(id.map(String::from)), SqlValue::from(name)]
    }

    #[test]
    fn test_dedup_preserve_first() {
        let rows = vec![row(Some("a"), "one"), row(Some("a"), "two"), row(Some("b"), "three")];
        let out = dedup_rows(&PAIRS, rows);
        assert_eq!(out, vec![row(Some("a"), "one"), row(Some("b"), "three")]);
    }

    #[test]
    fn test_dedup_catalog_keeps_last_value() {
        let rows = vec![row(Some("a"), "one"), row(Some("b"), "x"), row(Some("a"), "two")];
        let out = dedup_rows(&CATALOG, rows);
        assert_eq!(out, vec![row(Some("a"), "two"), row(Some("b"), "x")]);
    }

    #[test]
    fn test_null_keys_never_collide() {
        let rows = vec![row(None, "one"), row(None, "two")];
        assert_eq!(dedup_rows(&PAIRS, rows).len(), 2);
    }

    #[test]
    fn test_quoting() {
        assert_eq!(TableRef::new("lml_users", "main").quoted(), "\"lml_users\".\"main\"");
        assert_eq!(quote_ident("order"), "\"order\"");
        assert_eq!(CATALOG.non_key_columns().collect::<Vec<_>>(), vec!["name"]);
    }
}

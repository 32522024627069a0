//! In-memory tabular representation shared by every stage
//!
//! A [`RecordBatch`] is an ordered list of [`Row`]s plus the union of their
//! column names in first-seen order. Before transformation rows may carry
//! different column sets; after transformation every row holds every column.

use serde_json::Number;
use std::collections::BTreeMap;
use std::fmt;

/// A single cell value
///
/// Numbers keep their integer/float distinction so they round-trip through
/// the structured-record codec and bind to the right SQL type.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the cell, parsing text when needed
    ///
    /// Returns `None` for null, booleans and text that is not a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Text(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
            Value::Null | Value::Bool(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Infer a typed value from raw delimited text
    ///
    /// Empty text is null; integers, floats and `true`/`false` are parsed;
    /// everything else stays text.
    pub fn infer(raw: &str) -> Self {
        if raw.is_empty() {
            return Value::Null;
        }
        if let Ok(i) = raw.parse::<i64>() {
            return Value::Integer(i);
        }
        if let Ok(f) = raw.parse::<f64>()
            && f.is_finite()
        {
            return Value::Float(f);
        }
        match raw {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::Text(raw.to_string()),
        }
    }

    /// Lossless conversion from a JSON scalar; arrays and objects become JSON text
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::Text(s.clone()),
            other => Value::Text(other.to_string()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::Number((*i).into()),
            Value::Float(f) => Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Value {
    /// Delimited-text rendering; floats always keep a decimal point
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

/// One row: column name to cell value
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    cells: BTreeMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.cells.get(column)
    }

    pub fn get_mut(&mut self, column: &str) -> Option<&mut Value> {
        self.cells.get_mut(column)
    }

    pub fn insert(&mut self, column: impl Into<String>, value: Value) {
        self.cells.insert(column.into(), value);
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.cells.remove(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.cells.contains_key(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &String> {
        self.cells.keys()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Value for `column`, or null when the row does not carry it
    pub fn value_or_null(&self, column: &str) -> Value {
        self.cells.get(column).cloned().unwrap_or(Value::Null)
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self {
            cells: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// An ordered sequence of rows plus their column union
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordBatch {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl RecordBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty batch with a known header
    pub fn with_columns(columns: Vec<String>) -> Self {
        let mut batch = Self::new();
        for column in columns {
            batch.add_column(column);
        }
        batch
    }

    /// Build a batch from rows, deriving the column union from the rows
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let mut batch = Self::new();
        for row in rows {
            batch.push(row);
        }
        batch
    }

    /// Append a row, extending the column union with any new column names
    ///
    /// New columns from a single row are added in sorted order since a row
    /// does not carry its own ordering.
    pub fn push(&mut self, row: Row) {
        let new: Vec<String> = row
            .columns()
            .filter(|c| !self.columns.contains(c))
            .cloned()
            .collect();
        self.columns.extend(new);
        self.rows.push(row);
    }

    /// Register a column in the union if it is not already present
    pub fn add_column(&mut self, column: impl Into<String>) {
        let column = column.into();
        if !self.columns.contains(&column) {
            self.columns.push(column);
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_parts(self) -> (Vec<String>, Vec<Row>) {
        (self.columns, self.rows)
    }

    pub fn from_parts(columns: Vec<String>, rows: Vec<Row>) -> Self {
        let mut batch = Self::with_columns(columns);
        for row in rows {
            batch.push(row);
        }
        batch
    }

    /// Concatenate batches in order; the column union keeps first-seen order
    pub fn concat(batches: impl IntoIterator<Item = RecordBatch>) -> Self {
        let mut combined = Self::new();
        for batch in batches {
            let (columns, rows) = batch.into_parts();
            for column in columns {
                combined.add_column(column);
            }
            combined.rows.extend(rows);
        }
        combined
    }

    /// True when every row carries exactly the batch's column set
    pub fn is_uniform(&self) -> bool {
        self.rows.iter().all(|row| {
            row.len() == self.columns.len() && self.columns.iter().all(|c| row.contains(c))
        })
    }

    /// Rename a column in the header and in every row
    pub fn rename_column(&mut self, from: &str, to: &str) {
        if from == to || !self.has_column(from) {
            return;
        }
        if self.has_column(to) {
            self.columns.retain(|c| c != from);
        } else if let Some(slot) = self.columns.iter_mut().find(|c| *c == from) {
            *slot = to.to_string();
        }
        for row in &mut self.rows {
            if let Some(value) = row.remove(from) {
                row.insert(to, value);
            }
        }
    }

    /// Drop a column from the header and every row
    pub fn drop_column(&mut self, column: &str) {
        self.columns.retain(|c| c != column);
        for row in &mut self.rows {
            row.remove(column);
        }
    }

    pub fn rows_mut(&mut self) -> &mut Vec<Row> {
        &mut self.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().map(|(k, v)| (*k, v.clone())).collect()
    }

    #[test]
    fn test_concat_keeps_first_seen_column_order() {
        let a = RecordBatch::from_parts(
            vec!["id".into(), "name".into()],
            vec![row(&[("id", Value::Integer(1)), ("name", Value::text("a"))])],
        );
        let b = RecordBatch::from_parts(
            vec!["height".into(), "id".into()],
            vec![row(&[("id", Value::Integer(2)), ("height", Value::Float(1.5))])],
        );

        let combined = RecordBatch::concat(vec![a, b]);
        assert_eq!(combined.columns(), &["id", "name", "height"]);
        assert_eq!(combined.len(), 2);
        assert!(!combined.is_uniform());
    }

    #[test]
    fn test_rename_column() {
        let mut batch = RecordBatch::from_parts(
            vec!["height".into()],
            vec![row(&[("height", Value::Integer(70))])],
        );
        batch.rename_column("height", "height_inches");

        assert_eq!(batch.columns(), &["height_inches"]);
        assert_eq!(batch.rows()[0].get("height_inches"), Some(&Value::Integer(70)));
        assert!(batch.rows()[0].get("height").is_none());
    }

    #[test]
    fn test_infer() {
        assert_eq!(Value::infer(""), Value::Null);
        assert_eq!(Value::infer("42"), Value::Integer(42));
        assert_eq!(Value::infer("3.0"), Value::Float(3.0));
        assert_eq!(Value::infer("true"), Value::Bool(true));
        assert_eq!(Value::infer("abc"), Value::text("abc"));
    }

    #[test]
    fn test_float_display_keeps_decimal_point() {
        assert_eq!(Value::Float(3.0).to_string(), "3.0");
        assert_eq!(Value::Float(-3.106855).to_string(), "-3.106855");
        assert_eq!(Value::Null.to_string(), "");
    }

    #[test]
    fn test_as_f64() {
        assert_eq!(Value::text(" 12.5 ").as_f64(), Some(12.5));
        assert_eq!(Value::text("abc").as_f64(), None);
        assert_eq!(Value::Integer(3).as_f64(), Some(3.0));
        assert_eq!(Value::Null.as_f64(), None);
    }
}

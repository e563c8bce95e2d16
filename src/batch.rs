//! Tabular record batches
//!
//! A [`Batch`] is the unit handed over by the extraction stage: ordered rows
//! that all share one column set. Column kinds ([`ColumnType`]) are inferred
//! per write call from the values themselves and are never persisted.

use chrono::{NaiveDateTime, TimeDelta};
use std::collections::HashSet;

use crate::database::{WriteError, WriteResult};

/// Timestamp layout used whenever a timestamp is rendered as text
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// A single scalar cell
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
    /// Stored as integer nanoseconds
    Duration(TimeDelta),
    /// Nested arrays/objects. No column type maps to these.
    Complex(serde_json::Value),
}

impl Value {
    /// Check if the value is SQL NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The column kind this single value contributes to inference
    pub fn kind(&self) -> Option<ColumnType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(ColumnType::Boolean),
            Value::Int(_) => Some(ColumnType::Integer),
            Value::Float(_) => Some(ColumnType::Floating),
            Value::Text(_) => Some(ColumnType::Text),
            Value::Timestamp(_) => Some(ColumnType::Datetime),
            Value::Duration(_) => Some(ColumnType::Duration),
            Value::Complex(_) => Some(ColumnType::Complex),
        }
    }

    /// Render a timestamp in [`TIMESTAMP_FORMAT`]
    pub fn timestamp_text(ts: &NaiveDateTime) -> String {
        ts.format(TIMESTAMP_FORMAT).to_string()
    }

    /// Integer nanoseconds for a duration, `None` when it overflows i64
    pub fn duration_nanos(delta: &TimeDelta) -> Option<i64> {
        delta.num_nanoseconds()
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::Text(s),
            other @ (serde_json::Value::Array(_) | serde_json::Value::Object(_)) => {
                Value::Complex(other)
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::Timestamp(value)
    }
}

impl From<TimeDelta> for Value {
    fn from(value: TimeDelta) -> Self {
        Value::Duration(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Inferred scalar kind of a column across a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Integer,
    Floating,
    Boolean,
    Text,
    Datetime,
    Duration,
    /// Only nulls (or no rows at all)
    Empty,
    /// Nested values; cannot be mapped to a storage type
    Complex,
    /// Incompatible scalar kinds in one column
    Mixed,
}

impl ColumnType {
    /// Infer the kind of a column from its values, ignoring nulls
    ///
    /// Integers mixed with floats widen to [`ColumnType::Floating`]; any
    /// complex value makes the whole column [`ColumnType::Complex`].
    pub fn infer<'a>(values: impl IntoIterator<Item = &'a Value>) -> ColumnType {
        let mut inferred: Option<ColumnType> = None;

        for value in values {
            let Some(kind) = value.kind() else {
                continue;
            };
            if kind == ColumnType::Complex {
                return ColumnType::Complex;
            }
            inferred = Some(match inferred {
                None => kind,
                Some(current) if current == kind => current,
                Some(ColumnType::Integer) if kind == ColumnType::Floating => ColumnType::Floating,
                Some(ColumnType::Floating) if kind == ColumnType::Integer => ColumnType::Floating,
                Some(_) => ColumnType::Mixed,
            });
        }

        inferred.unwrap_or(ColumnType::Empty)
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ColumnType::Integer => "integer",
            ColumnType::Floating => "floating",
            ColumnType::Boolean => "boolean",
            ColumnType::Text => "text",
            ColumnType::Datetime => "datetime",
            ColumnType::Duration => "duration",
            ColumnType::Empty => "empty",
            ColumnType::Complex => "complex",
            ColumnType::Mixed => "mixed",
        };
        write!(f, "{}", name)
    }
}

/// Ordered rows sharing one column set
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Batch {
    /// Create a batch from column names and positional rows
    ///
    /// Fails with [`WriteError::InvalidBatch`] on duplicate or empty column
    /// names, on rows without columns, or when a row's width differs from
    /// the column count.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> WriteResult<Self> {
        if columns.is_empty() && !rows.is_empty() {
            return Err(WriteError::InvalidBatch(
                "rows were given without any columns".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for column in &columns {
            if column.is_empty() {
                return Err(WriteError::InvalidBatch(
                    "column names must not be empty".to_string(),
                ));
            }
            if !seen.insert(column.as_str()) {
                return Err(WriteError::InvalidBatch(format!(
                    "duplicate column '{}'",
                    column
                )));
            }
        }

        if let Some((index, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(WriteError::InvalidBatch(format!(
                "row {} has {} values, expected {}",
                index,
                row.len(),
                columns.len()
            )));
        }

        Ok(Self { columns, rows })
    }

    /// Create a batch from JSON objects
    ///
    /// The first object's keys define the column set; every other object must
    /// carry exactly the same keys.
    pub fn from_json_rows(records: &[serde_json::Value]) -> WriteResult<Self> {
        let Some(first) = records.first() else {
            return Self::new(Vec::new(), Vec::new());
        };
        let first = first.as_object().ok_or_else(|| {
            WriteError::InvalidBatch("row 0 is not a JSON object".to_string())
        })?;
        let columns: Vec<String> = first.keys().cloned().collect();

        let mut rows = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            let object = record.as_object().ok_or_else(|| {
                WriteError::InvalidBatch(format!("row {} is not a JSON object", index))
            })?;
            if object.len() != columns.len() || !columns.iter().all(|c| object.contains_key(c)) {
                return Err(WriteError::InvalidBatch(format!(
                    "row {} does not match the column set of row 0",
                    index
                )));
            }
            rows.push(
                columns
                    .iter()
                    .map(|c| Value::from(object[c].clone()))
                    .collect(),
            );
        }

        Self::new(columns, rows)
    }

    /// Column names in batch order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Positional rows
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the batch has no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column, if present
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Check if the batch carries a column
    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Iterate over one column's values
    pub fn column_values(&self, index: usize) -> impl Iterator<Item = &Value> + '_ {
        self.rows.iter().map(move |row| &row[index])
    }

    /// Inferred type of every column, in batch order
    pub fn column_types(&self) -> Vec<(String, ColumnType)> {
        self.columns
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), ColumnType::infer(self.column_values(i))))
            .collect()
    }

    /// Split rows into pages of at most `page_size` rows
    pub fn pages(&self, page_size: usize) -> std::slice::Chunks<'_, Vec<Value>> {
        self.rows.chunks(page_size.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_infer_integer_and_floating() {
        let ints = [Value::Int(1), Value::Null, Value::Int(3)];
        assert_eq!(ColumnType::infer(&ints), ColumnType::Integer);

        let widened = [Value::Int(1), Value::Float(2.5)];
        assert_eq!(ColumnType::infer(&widened), ColumnType::Floating);
    }

    #[test]
    fn test_infer_empty_mixed_complex() {
        assert_eq!(ColumnType::infer(&[Value::Null, Value::Null]), ColumnType::Empty);
        assert_eq!(ColumnType::infer(std::iter::empty()), ColumnType::Empty);
        assert_eq!(
            ColumnType::infer(&[Value::Int(1), Value::Text("a".into())]),
            ColumnType::Mixed
        );
        assert_eq!(
            ColumnType::infer(&[
                Value::Int(1),
                Value::Text("a".into()),
                Value::Complex(json!([1, 2]))
            ]),
            ColumnType::Complex
        );
    }

    #[test]
    fn test_infer_temporal() {
        let ts = NaiveDateTime::parse_from_str("2024-03-01 10:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        assert_eq!(
            ColumnType::infer(&[Value::Timestamp(ts), Value::Null]),
            ColumnType::Datetime
        );
        assert_eq!(
            ColumnType::infer(&[Value::Duration(TimeDelta::seconds(5))]),
            ColumnType::Duration
        );
    }

    #[test]
    fn test_from_json_rows() {
        let batch = Batch::from_json_rows(&[
            json!({"id": 1, "name": "a", "tags": ["x"]}),
            json!({"id": 2, "name": null, "tags": null}),
        ])
        .unwrap();

        assert_eq!(batch.len(), 2);
        let types = batch.column_types();
        let lookup = |name: &str| types.iter().find(|(c, _)| c == name).unwrap().1;
        assert_eq!(lookup("id"), ColumnType::Integer);
        assert_eq!(lookup("name"), ColumnType::Text);
        assert_eq!(lookup("tags"), ColumnType::Complex);
    }

    #[test]
    fn test_from_json_rows_rejects_differing_columns() {
        let result = Batch::from_json_rows(&[json!({"id": 1}), json!({"id": 2, "extra": true})]);
        assert!(matches!(result, Err(WriteError::InvalidBatch(_))));

        let result = Batch::from_json_rows(&[json!([1, 2])]);
        assert!(matches!(result, Err(WriteError::InvalidBatch(_))));
    }

    #[test]
    fn test_new_rejects_bad_shapes() {
        let result = Batch::new(
            vec!["id".into(), "id".into()],
            vec![vec![Value::Int(1), Value::Int(2)]],
        );
        assert!(matches!(result, Err(WriteError::InvalidBatch(_))));

        let result = Batch::new(vec!["id".into()], vec![vec![Value::Int(1), Value::Int(2)]]);
        assert!(matches!(result, Err(WriteError::InvalidBatch(_))));
    }

    #[test]
    fn test_rows_without_columns_rejected() {
        let result = Batch::from_json_rows(&[json!({})]);
        assert!(matches!(result, Err(WriteError::InvalidBatch(_))));

        let result = Batch::new(Vec::new(), vec![Vec::new()]);
        assert!(matches!(result, Err(WriteError::InvalidBatch(_))));

        assert!(Batch::new(Vec::new(), Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn test_pages() {
        let rows = (0..5).map(|i| vec![Value::Int(i)]).collect();
        let batch = Batch::new(vec!["id".into()], rows).unwrap();
        let sizes: Vec<usize> = batch.pages(2).map(|p| p.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }
}

//! DuckDB session
//!
//! Embedded [`SqlSession`] over a `duckdb::Connection`, backed by a file or
//! held in memory. Upserts are classified with an existence probe.

use std::path::{Path, PathBuf};

use duckdb::types::{ToSqlOutput, ValueRef};
use duckdb::{ToSql, params_from_iter};

use super::{Dialect, QueryResult, SqlSession, WriteError, WriteResult};
use crate::batch::Value;

/// DuckDB session
///
/// Supports both file-based persistence and in-memory mode.
pub struct DuckDbSession {
    /// Path to the database file (None for in-memory)
    db_path: Option<PathBuf>,
    connection: duckdb::Connection,
}

impl DuckDbSession {
    /// Open a file-based DuckDB database
    pub fn new(db_path: impl AsRef<Path>) -> WriteResult<Self> {
        let path = db_path.as_ref().to_path_buf();
        let connection = duckdb::Connection::open(&path)
            .map_err(|e| WriteError::Connection(format!("Failed to open DuckDB: {}", e)))?;

        Ok(Self {
            db_path: Some(path),
            connection,
        })
    }

    /// Create an in-memory DuckDB session
    ///
    /// Useful for testing; nothing survives the session.
    pub fn in_memory() -> WriteResult<Self> {
        let connection = duckdb::Connection::open_in_memory().map_err(|e| {
            WriteError::Connection(format!("Failed to create in-memory DuckDB: {}", e))
        })?;

        Ok(Self {
            db_path: None,
            connection,
        })
    }

    /// Get the database file path (None for in-memory)
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Check if this is an in-memory database
    pub fn is_in_memory(&self) -> bool {
        self.db_path.is_none()
    }

    /// Run one or more statements without parameters
    pub fn execute_batch(&self, sql: &str) -> WriteResult<()> {
        self.connection
            .execute_batch(sql)
            .map_err(|e| WriteError::sql(sql, e))
    }

    /// Convert a DuckDB row to a JSON value
    fn row_to_json(row: &duckdb::Row, columns: &[String]) -> serde_json::Value {
        let mut map = serde_json::Map::new();

        for (i, col_name) in columns.iter().enumerate() {
            let value = match row.get_ref(i) {
                Ok(value_ref) => Self::value_ref_to_json(value_ref),
                Err(_) => serde_json::Value::Null,
            };
            map.insert(col_name.clone(), value);
        }

        serde_json::Value::Object(map)
    }

    /// Convert a DuckDB ValueRef to a JSON value
    fn value_ref_to_json(value: ValueRef) -> serde_json::Value {
        match value {
            ValueRef::Null => serde_json::Value::Null,
            ValueRef::Boolean(b) => serde_json::Value::Bool(b),
            ValueRef::TinyInt(i) => i.into(),
            ValueRef::SmallInt(i) => i.into(),
            ValueRef::Int(i) => i.into(),
            ValueRef::BigInt(i) => i.into(),
            // SUM over integers yields HUGEINT
            ValueRef::HugeInt(i) => match i64::try_from(i) {
                Ok(small) => small.into(),
                Err(_) => serde_json::Value::String(i.to_string()),
            },
            ValueRef::UTinyInt(i) => i.into(),
            ValueRef::USmallInt(i) => i.into(),
            ValueRef::UInt(i) => i.into(),
            ValueRef::UBigInt(i) => i.into(),
            ValueRef::Float(f) => serde_json::Number::from_f64(f as f64)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ValueRef::Double(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ValueRef::Decimal(d) => serde_json::Value::String(d.to_string()),
            ValueRef::Text(bytes) => String::from_utf8_lossy(bytes).into_owned().into(),
            ValueRef::Blob(bytes) => {
                use base64::Engine;
                serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
            }
            other => serde_json::Value::String(format!("{:?}", other)),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        use duckdb::types::Value as DuckValue;

        Ok(match self {
            Value::Null => ToSqlOutput::Owned(DuckValue::Null),
            Value::Bool(b) => ToSqlOutput::Owned(DuckValue::Boolean(*b)),
            Value::Int(i) => ToSqlOutput::Owned(DuckValue::BigInt(*i)),
            Value::Float(f) => ToSqlOutput::Owned(DuckValue::Double(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Timestamp(ts) => ToSqlOutput::Owned(DuckValue::Text(Value::timestamp_text(ts))),
            Value::Duration(d) => ToSqlOutput::Owned(
                Value::duration_nanos(d)
                    .map(DuckValue::BigInt)
                    .unwrap_or(DuckValue::Null),
            ),
            Value::Complex(json) => ToSqlOutput::Owned(DuckValue::Text(json.to_string())),
        })
    }
}

impl SqlSession for DuckDbSession {
    fn dialect(&self) -> Dialect {
        Dialect::DuckDb
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> WriteResult<u64> {
        self.connection
            .execute(sql, params_from_iter(params.iter()))
            .map(|affected| affected as u64)
            .map_err(|e| WriteError::sql(sql, e))
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> WriteResult<QueryResult> {
        let mut stmt = self
            .connection
            .prepare(sql)
            .map_err(|e| WriteError::sql(sql, e))?;

        // In DuckDB 1.4+, we need to execute the query first, then get columns
        let mut result_rows = stmt
            .query(params_from_iter(params.iter()))
            .map_err(|e| WriteError::sql(sql, e))?;

        let column_count = result_rows.as_ref().map(|r| r.column_count()).unwrap_or(0);
        let columns: Vec<String> = (0..column_count)
            .map(|i| {
                result_rows
                    .as_ref()
                    .and_then(|r| r.column_name(i).ok())
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| format!("col{}", i))
            })
            .collect();

        let mut rows = Vec::new();
        while let Some(row) = result_rows.next().map_err(|e| WriteError::sql(sql, e))? {
            rows.push(Self::row_to_json(row, &columns));
        }

        Ok(QueryResult::new(columns, rows))
    }

    fn begin(&mut self) -> WriteResult<()> {
        self.execute_batch("BEGIN TRANSACTION")
    }

    fn commit(&mut self) -> WriteResult<()> {
        self.execute_batch("COMMIT")
    }

    fn rollback(&mut self) -> WriteResult<()> {
        self.execute_batch("ROLLBACK")
    }
}

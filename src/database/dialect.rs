//! SQL dialects
//!
//! A [`Dialect`] knows how to quote identifiers, render literals, map
//! inferred column types to storage types and classify upserted rows.

use serde::{Deserialize, Serialize};

use super::TargetTable;
use crate::batch::{ColumnType, Value};

/// SQL dialect of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// DuckDB embedded database (default)
    #[default]
    DuckDb,
    /// PostgreSQL row store
    Postgres,
    /// Redshift column store, no native upsert
    Redshift,
}

/// How an insert-or-update statement tells inserted rows from updated ones
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowClassifier {
    /// `RETURNING` a system column that is zero for freshly inserted tuples
    SystemColumn(&'static str),
    /// Count key matches in the target before each upsert
    ExistenceProbe,
}

impl Dialect {
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::DuckDb => "duckdb",
            Dialect::Postgres => "postgres",
            Dialect::Redshift => "redshift",
        }
    }

    /// Schema used when the configuration names none
    pub fn default_schema(&self) -> &'static str {
        match self {
            Dialect::DuckDb => "main",
            Dialect::Postgres | Dialect::Redshift => "public",
        }
    }

    /// Row classification capability; `None` means upserts need staging
    pub fn row_classifier(&self) -> Option<RowClassifier> {
        match self {
            Dialect::Postgres => Some(RowClassifier::SystemColumn("xmax")),
            Dialect::DuckDb => Some(RowClassifier::ExistenceProbe),
            Dialect::Redshift => None,
        }
    }

    /// Double-quote an identifier, doubling embedded quotes
    pub fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Storage type for an inferred column type
    ///
    /// Complex columns have no mapping and return `None`.
    pub fn column_type(&self, column_type: ColumnType) -> Option<&'static str> {
        let sql = match column_type {
            ColumnType::Integer | ColumnType::Duration => "BIGINT",
            ColumnType::Floating => match self {
                Dialect::DuckDb => "DOUBLE",
                Dialect::Postgres | Dialect::Redshift => "DOUBLE PRECISION",
            },
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Datetime => "TIMESTAMP",
            ColumnType::Empty | ColumnType::Text | ColumnType::Mixed => match self {
                Dialect::Redshift => "VARCHAR(MAX)",
                Dialect::DuckDb | Dialect::Postgres => "TEXT",
            },
            ColumnType::Complex => return None,
        };
        Some(sql)
    }

    /// Render a value as an inline SQL literal
    pub fn literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(true) => "TRUE".to_string(),
            Value::Bool(false) => "FALSE".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) if f.is_nan() => "'NaN'".to_string(),
            Value::Float(f) if f.is_infinite() => {
                if *f > 0.0 {
                    "'Infinity'".to_string()
                } else {
                    "'-Infinity'".to_string()
                }
            }
            Value::Float(f) => format!("{:?}", f),
            Value::Text(s) => quote_text(s),
            Value::Timestamp(ts) => format!("TIMESTAMP {}", quote_text(&Value::timestamp_text(ts))),
            Value::Duration(d) => Value::duration_nanos(d)
                .map(|n| n.to_string())
                .unwrap_or_else(|| "NULL".to_string()),
            Value::Complex(json) => quote_text(&json.to_string()),
        }
    }

    /// Statement emptying a staging table
    ///
    /// Redshift commits implicitly on `TRUNCATE`, so it deletes instead to
    /// stay inside the batch transaction.
    pub fn truncate_sql(&self, table: &TargetTable) -> String {
        match self {
            Dialect::Redshift => format!("DELETE FROM {}", table.qualified(*self)),
            Dialect::DuckDb | Dialect::Postgres => format!("TRUNCATE {}", table.qualified(*self)),
        }
    }
}

fn quote_text(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

impl std::str::FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "duckdb" => Ok(Dialect::DuckDb),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "redshift" => Ok(Dialect::Redshift),
            _ => Err(format!(
                "Unknown database backend: {}. Use 'duckdb', 'postgres' or 'redshift'.",
                s
            )),
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

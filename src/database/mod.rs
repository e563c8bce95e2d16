//! Database write-back layer
//!
//! This module merges [`Batch`]es into relational tables:
//! - [`SchemaSynchronizer`]: adds missing batch columns to the target table
//! - [`ConflictResolver`]: direct insert, native upsert or staged merge
//! - [`BatchWriter`]: drives both inside one transaction and keeps
//!   [`WriteMetrics`](crate::metrics::WriteMetrics)
//!
//! Sessions are blocking. DuckDB is embedded; PostgreSQL and Redshift are
//! reached through `tokio-postgres` on a private runtime.

use serde::{Deserialize, Serialize};

use crate::batch::{Batch, ColumnType, Value};

// Re-export implementations based on features
#[cfg(feature = "duckdb-backend")]
pub mod duckdb;

#[cfg(feature = "postgres-backend")]
pub mod postgres;

pub mod config;
pub mod dialect;
pub mod resolver;
pub mod schema;
pub mod writer;

#[cfg(test)]
pub(crate) mod test_support;

#[cfg(feature = "duckdb-backend")]
pub use self::duckdb::DuckDbSession;

#[cfg(feature = "postgres-backend")]
pub use self::postgres::PostgresSession;

pub use config::WriterConfig;
pub use dialect::{Dialect, RowClassifier};
pub use resolver::{ConflictResolver, MergeOutcome};
pub use schema::SchemaSynchronizer;
pub use writer::BatchWriter;

/// Longest statement prefix carried inside [`WriteError::SqlExecution`]
const MAX_STATEMENT_CHARS: usize = 200;

/// Error type for write-back operations
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    /// A batch column has no storage type mapping
    #[error("Unsupported type for column '{column}': {kind}")]
    UnsupportedType { column: String, kind: ColumnType },

    /// Live table metadata is missing or inconsistent
    #[error("Schema inspection failed for {table}: {reason}")]
    SchemaInspection { table: String, reason: String },

    /// A conflict key column is absent from the batch or the target table
    #[error("Conflict key column '{column}' missing from {location}")]
    ConflictKeyMissing {
        column: String,
        location: &'static str,
    },

    /// Failed to connect to database
    #[error("Connection failed: {0}")]
    Connection(String),

    /// A statement was rejected by the engine
    #[error("SQL execution failed: {message} (statement: {statement})")]
    SqlExecution { statement: String, message: String },

    /// Batch rows do not share one column set
    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),
}

impl WriteError {
    /// Wrap an engine error together with the statement that caused it
    pub fn sql(statement: &str, err: impl std::fmt::Display) -> Self {
        WriteError::SqlExecution {
            statement: truncate_statement(statement),
            message: err.to_string(),
        }
    }
}

fn truncate_statement(statement: &str) -> String {
    match statement.char_indices().nth(MAX_STATEMENT_CHARS) {
        Some((cut, _)) => format!("{}...", &statement[..cut]),
        None => statement.to_string(),
    }
}

/// Result type for write-back operations
pub type WriteResult<T> = Result<T, WriteError>;

/// Query result row as a JSON value
pub type QueryRow = serde_json::Value;

/// Query result set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names
    pub columns: Vec<String>,
    /// Rows of data
    pub rows: Vec<QueryRow>,
}

impl QueryResult {
    /// Create a new query result
    pub fn new(columns: Vec<String>, rows: Vec<QueryRow>) -> Self {
        Self { columns, rows }
    }

    /// Create an empty result
    pub fn empty() -> Self {
        Self::default()
    }

    /// Get the number of rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Check if the result is empty
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Read an unsigned count from the first row
    ///
    /// `statement` is the query that produced this result; it is reported when
    /// the count cannot be read.
    ///
    /// Engines return aggregates as integers, floats or (for wide numerics)
    /// strings; all three are accepted. NULL reads as zero.
    pub fn first_count(&self, statement: &str, column: &str) -> WriteResult<u64> {
        let value = self
            .rows
            .first()
            .and_then(|row| row.get(column))
            .unwrap_or(&serde_json::Value::Null);

        match value {
            serde_json::Value::Null => Ok(0),
            serde_json::Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
                .ok_or_else(|| {
                    WriteError::sql(statement, format!("negative count {} in '{}'", n, column))
                }),
            serde_json::Value::String(s) => s.trim().parse::<u64>().map_err(|e| {
                WriteError::sql(
                    statement,
                    format!("unreadable count '{}' in '{}': {}", s, column, e),
                )
            }),
            other => Err(WriteError::sql(
                statement,
                format!("unexpected value {} for count '{}'", other, column),
            )),
        }
    }}

/// A blocking SQL session bound to one dialect
///
/// Statements use `$1, $2, ...` placeholders. `execute` returns the engine's
/// affected-row count. The default transaction methods issue plain
/// statements; backends with dedicated calls override them.
pub trait SqlSession {
    /// SQL dialect spoken by this session
    fn dialect(&self) -> Dialect;

    /// Execute a statement and return the affected row count
    fn execute(&mut self, sql: &str, params: &[Value]) -> WriteResult<u64>;

    /// Execute a query and return its rows as JSON objects
    fn query(&mut self, sql: &str, params: &[Value]) -> WriteResult<QueryResult>;

    /// Open a transaction
    fn begin(&mut self) -> WriteResult<()> {
        self.execute("BEGIN", &[]).map(|_| ())
    }

    /// Commit the open transaction
    fn commit(&mut self) -> WriteResult<()> {
        self.execute("COMMIT", &[]).map(|_| ())
    }

    /// Roll back the open transaction
    fn rollback(&mut self) -> WriteResult<()> {
        self.execute("ROLLBACK", &[]).map(|_| ())
    }
}

impl<S: SqlSession + ?Sized> SqlSession for Box<S> {
    fn dialect(&self) -> Dialect {
        (**self).dialect()
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> WriteResult<u64> {
        (**self).execute(sql, params)
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> WriteResult<QueryResult> {
        (**self).query(sql, params)
    }

    fn begin(&mut self) -> WriteResult<()> {
        (**self).begin()
    }

    fn commit(&mut self) -> WriteResult<()> {
        (**self).commit()
    }

    fn rollback(&mut self) -> WriteResult<()> {
        (**self).rollback()
    }
}

/// A schema-qualified table name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetTable {
    pub schema: String,
    pub table: String,
}

impl TargetTable {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Quoted `"schema"."table"` reference for the given dialect
    pub fn qualified(&self, dialect: Dialect) -> String {
        format!(
            "{}.{}",
            dialect.quote_ident(&self.schema),
            dialect.quote_ident(&self.table)
        )
    }
}

impl std::fmt::Display for TargetTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// What to do when an incoming row matches an existing row on the conflict key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictAction {
    /// Append only, no conflict handling
    #[default]
    None,
    /// Overwrite the non-key columns of the existing row
    Update,
    /// Keep the existing row
    Ignore,
}

impl std::str::FromStr for ConflictAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "append" => Ok(ConflictAction::None),
            "update" => Ok(ConflictAction::Update),
            "ignore" | "nothing" => Ok(ConflictAction::Ignore),
            _ => Err(format!("Unknown conflict action: {}", s)),
        }
    }
}

impl std::fmt::Display for ConflictAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictAction::None => write!(f, "none"),
            ConflictAction::Update => write!(f, "update"),
            ConflictAction::Ignore => write!(f, "ignore"),
        }
    }
}

/// Conflict key columns and the action taken on a key match
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictSpec {
    /// Ordered key columns; composite keys compare every column
    pub key: Vec<String>,
    pub action: ConflictAction,
}

impl ConflictSpec {
    /// Plain append without a conflict key
    pub fn append() -> Self {
        Self::default()
    }

    /// Insert new rows and overwrite existing ones
    pub fn update<S: Into<String>>(key: impl IntoIterator<Item = S>) -> Self {
        Self {
            key: key.into_iter().map(Into::into).collect(),
            action: ConflictAction::Update,
        }
    }

    /// Insert new rows and leave existing ones untouched
    pub fn ignore<S: Into<String>>(key: impl IntoIterator<Item = S>) -> Self {
        Self {
            key: key.into_iter().map(Into::into).collect(),
            action: ConflictAction::Ignore,
        }
    }

    pub fn is_append(&self) -> bool {
        self.action == ConflictAction::None
    }

    /// Check if a column belongs to the conflict key
    pub fn is_key(&self, column: &str) -> bool {
        self.key.iter().any(|k| k == column)
    }

    /// Batch columns that are not part of the key, in batch order
    pub fn non_key_columns<'a>(&self, batch: &'a Batch) -> Vec<&'a str> {
        batch
            .columns()
            .iter()
            .filter(|c| !self.is_key(c))
            .map(String::as_str)
            .collect()
    }
}

/// Per-call write configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteConfig {
    pub target: TargetTable,
    pub conflict: ConflictSpec,
}

impl WriteConfig {
    pub fn new(target: TargetTable, conflict: ConflictSpec) -> Self {
        Self { target, conflict }
    }
}

/// Output format for query results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// ASCII table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Format query results for display
pub fn format_query_result(result: &QueryResult, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(&result.rows).unwrap_or_else(|_| "[]".to_string())
        }
        OutputFormat::Table => format_as_table(result),
    }
}

fn cell_text(row: &QueryRow, column: &str) -> String {
    match row.get(column) {
        None | Some(serde_json::Value::Null) => "null".to_string(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn format_as_table(result: &QueryResult) -> String {
    if result.is_empty() {
        return "(0 rows)".to_string();
    }

    let cells: Vec<Vec<String>> = result
        .rows
        .iter()
        .map(|row| result.columns.iter().map(|c| cell_text(row, c)).collect())
        .collect();

    let mut widths: Vec<usize> = result.columns.iter().map(|c| c.chars().count()).collect();
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let render = |values: &[String]| -> String {
        values
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!("{:width$}", v, width = *w))
            .collect::<Vec<_>>()
            .join(" | ")
    };

    let mut lines = vec![render(&result.columns)];
    lines.push(
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    lines.extend(cells.iter().map(|row| render(row)));
    lines.push(format!("({} rows)", result.row_count()));

    lines.join("\n")
}

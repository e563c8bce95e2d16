//! Batch write-back engine
//!
//! Merges tabular record batches into relational tables:
//! - Conflict handling: append, native upsert or staged merge
//! - Schema drift: missing batch columns are added to the target
//! - Write metrics accumulated across a run
//! - Optional per-session query instrumentation
//!
//! Backends (feature-gated): DuckDB (default) and PostgreSQL/Redshift.

pub mod batch;
#[cfg(feature = "cli")]
pub mod cli;
pub mod database;
pub mod instrumentation;
pub mod metrics;

// Re-export commonly used types
pub use batch::{Batch, ColumnType, Value};
pub use database::{
    BatchWriter, ConflictAction, ConflictResolver, ConflictSpec, Dialect, MergeOutcome,
    QueryResult, RowClassifier, SchemaSynchronizer, SqlSession, TargetTable, WriteConfig,
    WriteError, WriteResult, WriterConfig,
};
pub use instrumentation::{CallFrame, InstrumentedSession, QueryStats, QueryStatsEntry};
pub use metrics::{WriteMetrics, WriteMetricsDelta};

#[cfg(feature = "duckdb-backend")]
pub use database::DuckDbSession;

#[cfg(feature = "postgres-backend")]
pub use database::PostgresSession;

//! Schema synchronization
//!
//! Reconciles a batch's columns against the live columns of a target table
//! and adds whatever is missing with `ALTER TABLE ... ADD COLUMN`. Only
//! additive changes are made; existing columns are never altered or dropped.
//!
//! DDL runs outside the data transaction. Two writers adding the same column
//! concurrently can race; the loser fails with a SQL error.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use super::{Dialect, SqlSession, TargetTable, WriteError, WriteResult};
use crate::batch::{ColumnType, Value};

/// Live column lookup, ordered by ordinal position
const LIVE_COLUMNS_SQL: &str = "SELECT column_name::text AS column_name \
     FROM information_schema.columns \
     WHERE table_schema::text = $1 AND table_name::text = $2 \
     ORDER BY ordinal_position";

/// A column the target table lacks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMigration {
    pub column: String,
    pub column_type: ColumnType,
    pub sql_type: &'static str,
}

/// Adds missing batch columns to target tables
#[derive(Debug, Clone, Copy)]
pub struct SchemaSynchronizer {
    dialect: Dialect,
}

impl SchemaSynchronizer {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    /// Fetch the live column names of a table
    ///
    /// Fails with [`WriteError::SchemaInspection`] when the table has no
    /// columns (it does not exist) or when a name is reported twice.
    pub fn live_columns<S: SqlSession + ?Sized>(
        &self,
        session: &mut S,
        table: &TargetTable,
    ) -> WriteResult<Vec<String>> {
        let result = session.query(
            LIVE_COLUMNS_SQL,
            &[
                Value::from(table.schema.as_str()),
                Value::from(table.table.as_str()),
            ],
        )?;

        let mut columns = Vec::with_capacity(result.row_count());
        let mut seen = HashSet::new();
        for row in &result.rows {
            let Some(name) = row.get("column_name").and_then(|v| v.as_str()) else {
                return Err(WriteError::SchemaInspection {
                    table: table.to_string(),
                    reason: format!("unreadable column metadata row: {}", row),
                });
            };
            if !seen.insert(name.to_string()) {
                return Err(WriteError::SchemaInspection {
                    table: table.to_string(),
                    reason: format!("column '{}' is listed more than once", name),
                });
            }
            columns.push(name.to_string());
        }

        if columns.is_empty() {
            return Err(WriteError::SchemaInspection {
                table: table.to_string(),
                reason: "table does not exist or has no columns".to_string(),
            });
        }

        Ok(columns)
    }

    /// Work out which batch columns must be added, without touching the database
    ///
    /// Every missing column is type-checked before anything is returned, so a
    /// complex column fails the whole plan rather than leaving it half applied.
    pub fn plan_migrations(
        &self,
        live: &[String],
        columns: &[(String, ColumnType)],
    ) -> WriteResult<Vec<ColumnMigration>> {
        let mut plan = Vec::new();

        for (column, column_type) in columns {
            if self.contains_column(live, column) {
                continue;
            }
            let sql_type =
                self.dialect
                    .column_type(*column_type)
                    .ok_or_else(|| WriteError::UnsupportedType {
                        column: column.clone(),
                        kind: *column_type,
                    })?;
            plan.push(ColumnMigration {
                column: column.clone(),
                column_type: *column_type,
                sql_type,
            });
        }

        Ok(plan)
    }

    /// `ALTER TABLE` statement for one migration
    pub fn add_column_sql(&self, table: &TargetTable, migration: &ColumnMigration) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            table.qualified(self.dialect),
            self.dialect.quote_ident(&migration.column),
            migration.sql_type
        )
    }

    /// Add the batch columns missing from an already fetched live column list
    pub fn apply_missing<S: SqlSession + ?Sized>(
        &self,
        session: &mut S,
        table: &TargetTable,
        live: &[String],
        columns: &[(String, ColumnType)],
    ) -> WriteResult<usize> {
        let plan = self.plan_migrations(live, columns)?;

        for migration in &plan {
            if migration.column_type == ColumnType::Duration {
                warn!(
                    "Column '{}' on {} holds durations; storing as BIGINT nanoseconds",
                    migration.column, table
                );
            }
            let sql = self.add_column_sql(table, migration);
            debug!("Schema migration: {}", sql);
            session.execute(&sql, &[])?;
        }

        if !plan.is_empty() {
            info!("Added {} column(s) to {}", plan.len(), table);
        }

        Ok(plan.len())
    }

    /// Make sure every batch column exists on the table
    ///
    /// # Returns
    /// Number of columns added
    pub fn ensure_columns<S: SqlSession + ?Sized>(
        &self,
        session: &mut S,
        table: &TargetTable,
        columns: &[(String, ColumnType)],
    ) -> WriteResult<usize> {
        let live = self.live_columns(session, table)?;
        self.apply_missing(session, table, &live, columns)
    }

    /// Check if a live column list already holds `column`
    ///
    /// DuckDB folds identifier case even when quoted.
    pub fn contains_column(&self, live: &[String], column: &str) -> bool {
        live.iter().any(|l| match self.dialect {
            Dialect::DuckDb => l.eq_ignore_ascii_case(column),
            Dialect::Postgres | Dialect::Redshift => l == column,
        })
    }
}

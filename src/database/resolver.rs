//! Conflict resolution strategies
//!
//! A [`ConflictResolver`] turns one batch into the SQL that applies it to a
//! target table and reports what happened:
//! - `Direct`: paged multi-row INSERTs, every row counted as inserted
//! - `NativeUpsert`: `ON CONFLICT` clauses, rows classified per statement
//! - `StagedMerge`: load a staging table, UPDATE the matches, then insert
//!   the rest through an anti-join
//!
//! The resolver never opens or closes transactions; the
//! [`BatchWriter`](super::BatchWriter) owns that boundary.

use tracing::debug;

use super::{
    ConflictAction, Dialect, RowClassifier, SqlSession, TargetTable, WriteConfig, WriteError,
    WriteResult,
};
use crate::batch::{Batch, Value};

/// Counts produced by applying one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub inserted: u64,
    pub updated: u64,
    pub staged: u64,
}

/// Write strategy, chosen once per writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictResolver {
    /// Append only
    Direct,
    /// Insert-or-update statements keyed on the conflict columns
    NativeUpsert { classifier: RowClassifier },
    /// Stage, update matches, insert the rest
    StagedMerge { staging: TargetTable },
}

impl ConflictResolver {
    /// Pick the strategy for a backend
    ///
    /// A configured staging table always selects `StagedMerge`. Otherwise the
    /// dialect must be able to classify upserted rows.
    pub fn for_dialect(dialect: Dialect, staging: Option<TargetTable>) -> WriteResult<Self> {
        let resolver = match (staging, dialect.row_classifier()) {
            (Some(staging), _) => ConflictResolver::StagedMerge { staging },
            (None, Some(classifier)) => ConflictResolver::NativeUpsert { classifier },
            (None, None) => {
                return Err(WriteError::Config(format!(
                    "{} has no native upsert; configure a staging table",
                    dialect
                )));
            }
        };
        debug!("Selected {} strategy for {}", resolver.name(), dialect);
        Ok(resolver)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConflictResolver::Direct => "direct",
            ConflictResolver::NativeUpsert { .. } => "native-upsert",
            ConflictResolver::StagedMerge { .. } => "staged-merge",
        }
    }

    /// Staging table, for the staged strategy
    pub fn staging(&self) -> Option<&TargetTable> {
        match self {
            ConflictResolver::StagedMerge { staging } => Some(staging),
            _ => None,
        }
    }

    /// Apply a batch to the configured target
    ///
    /// Appends (action `None`) take the direct path whatever the strategy.
    /// Key columns are assumed to exist in both the batch and the target.
    pub fn apply<S: SqlSession + ?Sized>(
        &self,
        session: &mut S,
        batch: &Batch,
        config: &WriteConfig,
        page_size: usize,
    ) -> WriteResult<MergeOutcome> {
        let spec = &config.conflict;
        if spec.is_append() {
            let inserted = insert_pages(session, &config.target, batch, page_size, None)?;
            return Ok(MergeOutcome {
                inserted,
                ..Default::default()
            });
        }
        if spec.key.is_empty() {
            return Err(WriteError::Config(format!(
                "conflict action '{}' requires a conflict key",
                spec.action
            )));
        }

        match self {
            ConflictResolver::Direct => Err(WriteError::Config(format!(
                "direct strategy cannot apply conflict action '{}'",
                spec.action
            ))),
            ConflictResolver::NativeUpsert { classifier } => match spec.action {
                ConflictAction::Ignore => {
                    let dialect = session.dialect();
                    let on_conflict = format!(
                        "ON CONFLICT ({}) DO NOTHING",
                        column_list(dialect, spec.key.iter().map(String::as_str))
                    );
                    let inserted = insert_pages(
                        session,
                        &config.target,
                        batch,
                        page_size,
                        Some(&on_conflict),
                    )?;
                    Ok(MergeOutcome {
                        inserted,
                        ..Default::default()
                    })
                }
                _ => upsert_rows(session, batch, config, *classifier),
            },
            ConflictResolver::StagedMerge { staging } => {
                staged_merge(session, batch, config, staging, page_size)
            }
        }
    }
}

/// Comma-separated quoted column names
fn column_list<'a>(dialect: Dialect, columns: impl IntoIterator<Item = &'a str>) -> String {
    columns
        .into_iter()
        .map(|c| dialect.quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `left."k1" = right."k1" AND ...` in key order
fn key_predicate(dialect: Dialect, key: &[String], left: &str, right: &str) -> String {
    key.iter()
        .map(|k| {
            let k = dialect.quote_ident(k);
            format!("{left}.{k} = {right}.{k}")
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Multi-row INSERTs of at most `page_size` rows each
///
/// # Returns
/// Sum of the engine's affected-row counts
fn insert_pages<S: SqlSession + ?Sized>(
    session: &mut S,
    table: &TargetTable,
    batch: &Batch,
    page_size: usize,
    suffix: Option<&str>,
) -> WriteResult<u64> {
    let dialect = session.dialect();
    let head = format!(
        "INSERT INTO {} ({}) VALUES ",
        table.qualified(dialect),
        column_list(dialect, batch.columns().iter().map(String::as_str))
    );

    let mut affected = 0;
    for page in batch.pages(page_size) {
        let values = page
            .iter()
            .map(|row| {
                let literals: Vec<String> = row.iter().map(|v| dialect.literal(v)).collect();
                format!("({})", literals.join(", "))
            })
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!("{}{}", head, values);
        if let Some(suffix) = suffix {
            sql.push(' ');
            sql.push_str(suffix);
        }
        debug!("Inserting {} row(s) into {}", page.len(), table);
        affected += session.execute(&sql, &[])?;
    }
    Ok(affected)
}

/// Single-row insert-or-update statement with `$n` placeholders
fn upsert_sql(
    dialect: Dialect,
    batch: &Batch,
    config: &WriteConfig,
    classifier: RowClassifier,
) -> String {
    let spec = &config.conflict;
    let placeholders = (1..=batch.columns().len())
        .map(|i| format!("${}", i))
        .collect::<Vec<_>>()
        .join(", ");

    let non_key = spec.non_key_columns(batch);
    let action = if non_key.is_empty() {
        "DO NOTHING".to_string()
    } else {
        let assignments = non_key
            .iter()
            .map(|c| {
                let c = dialect.quote_ident(c);
                format!("{c} = EXCLUDED.{c}")
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("DO UPDATE SET {}", assignments)
    };

    let insert = format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {}",
        config.target.qualified(dialect),
        column_list(dialect, batch.columns().iter().map(String::as_str)),
        placeholders,
        column_list(dialect, spec.key.iter().map(String::as_str)),
        action
    );

    match classifier {
        RowClassifier::SystemColumn(system) => format!(
            "WITH upserted AS ({insert} RETURNING {system}) \
             SELECT COUNT(*) AS affected, \
             COALESCE(SUM(CASE WHEN {system} = 0 THEN 1 ELSE 0 END), 0) AS inserted, \
             COALESCE(SUM(CASE WHEN {system} = 0 THEN 0 ELSE 1 END), 0) AS updated \
             FROM upserted"
        ),
        RowClassifier::ExistenceProbe => insert,
    }
}

/// `SELECT COUNT(*)` of target rows sharing the key of one batch row
fn probe_sql(dialect: Dialect, config: &WriteConfig) -> String {
    let predicate = config
        .conflict
        .key
        .iter()
        .enumerate()
        .map(|(i, k)| format!("{} = ${}", dialect.quote_ident(k), i + 1))
        .collect::<Vec<_>>()
        .join(" AND ");
    format!(
        "SELECT COUNT(*) AS matches FROM {} WHERE {}",
        config.target.qualified(dialect),
        predicate
    )
}

/// One upsert per row, classified as inserted or updated
fn upsert_rows<S: SqlSession + ?Sized>(
    session: &mut S,
    batch: &Batch,
    config: &WriteConfig,
    classifier: RowClassifier,
) -> WriteResult<MergeOutcome> {
    let dialect = session.dialect();
    let sql = upsert_sql(dialect, batch, config, classifier);
    let mut outcome = MergeOutcome::default();

    match classifier {
        RowClassifier::SystemColumn(_) => {
            for row in batch.rows() {
                let result = session.query(&sql, row)?;
                outcome.inserted += result.first_count(&sql, "inserted")?;
                outcome.updated += result.first_count(&sql, "updated")?;
            }
        }
        RowClassifier::ExistenceProbe => {
            let probe = probe_sql(dialect, config);
            let key_positions = config
                .conflict
                .key
                .iter()
                .map(|k| {
                    batch
                        .column_index(k)
                        .ok_or_else(|| WriteError::ConflictKeyMissing {
                            column: k.clone(),
                            location: "batch",
                        })
                })
                .collect::<WriteResult<Vec<usize>>>()?;

            for row in batch.rows() {
                let key_values: Vec<Value> =
                    key_positions.iter().map(|&i| row[i].clone()).collect();
                let existing = session
                    .query(&probe, &key_values)?
                    .first_count(&probe, "matches")?;
                let affected = session.execute(&sql, row)?;
                if existing > 0 {
                    outcome.updated += affected;
                } else {
                    outcome.inserted += affected;
                }
            }
        }
    }

    debug!(
        "Upserted {} row(s) into {}: {} inserted, {} updated",
        batch.len(),
        config.target,
        outcome.inserted,
        outcome.updated
    );
    Ok(outcome)
}

/// Truncate and load staging, update matches, insert the remainder
fn staged_merge<S: SqlSession + ?Sized>(
    session: &mut S,
    batch: &Batch,
    config: &WriteConfig,
    staging: &TargetTable,
    page_size: usize,
) -> WriteResult<MergeOutcome> {
    let dialect = session.dialect();
    let spec = &config.conflict;
    let target = config.target.qualified(dialect);
    let stage = staging.qualified(dialect);
    let mut outcome = MergeOutcome::default();

    session.execute(&dialect.truncate_sql(staging), &[])?;
    outcome.staged = insert_pages(session, staging, batch, page_size, None)?;

    let non_key = spec.non_key_columns(batch);
    if spec.action == ConflictAction::Update && !non_key.is_empty() {
        let assignments = non_key
            .iter()
            .map(|c| {
                let c = dialect.quote_ident(c);
                format!("{c} = stg.{c}")
            })
            .collect::<Vec<_>>()
            .join(", ");
        let update = format!(
            "UPDATE {} AS tgt SET {} FROM {} stg WHERE {}",
            target,
            assignments,
            stage,
            key_predicate(dialect, &spec.key, "tgt", "stg")
        );
        outcome.updated = session.execute(&update, &[])?;
    }

    let select_list = batch
        .columns()
        .iter()
        .map(|c| format!("stg.{}", dialect.quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");
    let missing = spec
        .key
        .iter()
        .map(|k| format!("tgt.{} IS NULL", dialect.quote_ident(k)))
        .collect::<Vec<_>>()
        .join(" AND ");
    let insert = format!(
        "INSERT INTO {} ({}) SELECT {} FROM {} stg LEFT JOIN {} tgt ON {} WHERE {}",
        target,
        column_list(dialect, batch.columns().iter().map(String::as_str)),
        select_list,
        stage,
        target,
        key_predicate(dialect, &spec.key, "tgt", "stg"),
        missing
    );
    outcome.inserted = session.execute(&insert, &[])?;

    debug!(
        "Staged merge into {} via {}: {} staged, {} updated, {} inserted",
        config.target, staging, outcome.staged, outcome.updated, outcome.inserted
    );
    Ok(outcome)
}

//! Batch writer
//!
//! [`BatchWriter`] applies one batch at a time: conflict key checks, schema
//! synchronization, then the conflict resolver inside a single transaction.
//! Counts from committed batches accumulate in [`WriteMetrics`]; a failed
//! batch is rolled back and leaves the metrics untouched.

use tracing::{debug, info, warn};

use super::config::DEFAULT_PAGE_SIZE;
use super::{
    ConflictResolver, SchemaSynchronizer, SqlSession, TargetTable, WriteConfig, WriteError,
    WriteResult,
};
use crate::batch::Batch;
use crate::metrics::{WriteMetrics, WriteMetricsDelta};

/// Merges batches into a target table through one session
pub struct BatchWriter<S: SqlSession> {
    session: S,
    resolver: ConflictResolver,
    page_size: usize,
    metrics: WriteMetrics,
}

impl<S: SqlSession> BatchWriter<S> {
    /// Create a writer using the session dialect's native upsert
    ///
    /// Fails for dialects without row classification (Redshift); use
    /// [`BatchWriter::with_staging`] for those.
    pub fn new(session: S) -> WriteResult<Self> {
        let resolver = ConflictResolver::for_dialect(session.dialect(), None)?;
        Ok(Self::with_resolver(session, resolver))
    }

    /// Create a writer that merges through a staging table
    pub fn with_staging(session: S, staging: TargetTable) -> Self {
        Self::with_resolver(session, ConflictResolver::StagedMerge { staging })
    }

    /// Create a writer with an explicit strategy
    pub fn with_resolver(session: S, resolver: ConflictResolver) -> Self {
        Self {
            session,
            resolver,
            page_size: DEFAULT_PAGE_SIZE,
            metrics: WriteMetrics::new(),
        }
    }

    /// Set the maximum number of rows per multi-row INSERT
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Get reference to the session
    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    pub fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }

    pub fn into_session(self) -> S {
        self.session
    }

    /// Copy of the running totals
    pub fn metrics_snapshot(&self) -> WriteMetrics {
        self.metrics
    }

    /// Log every counter at info level
    pub fn report_metrics(&self) {
        for (name, value) in self.metrics.entries() {
            info!("{}: {}", name, value);
        }
    }

    /// Write one batch
    ///
    /// Conflict key columns are checked against the batch and the live target
    /// before any DDL. Missing columns are then added outside the transaction,
    /// and the merge runs between BEGIN and COMMIT.
    ///
    /// # Returns
    /// The counts this batch contributed to the running metrics
    pub fn write(&mut self, batch: &Batch, config: &WriteConfig) -> WriteResult<WriteMetricsDelta> {
        if batch.is_empty() {
            debug!("Skipping empty batch for {}", config.target);
            return Ok(WriteMetricsDelta::default());
        }

        let spec = &config.conflict;
        if !spec.is_append()
            && let Some(column) = spec.key.iter().find(|k| !batch.has_column(k))
        {
            return Err(WriteError::ConflictKeyMissing {
                column: column.clone(),
                location: "batch",
            });
        }

        let sync = SchemaSynchronizer::new(self.session.dialect());
        let live = sync.live_columns(&mut self.session, &config.target)?;
        if !spec.is_append()
            && let Some(column) = spec.key.iter().find(|k| !sync.contains_column(&live, k))
        {
            return Err(WriteError::ConflictKeyMissing {
                column: column.clone(),
                location: "target table",
            });
        }

        let columns = batch.column_types();
        let columns_added =
            sync.apply_missing(&mut self.session, &config.target, &live, &columns)?;
        if !spec.is_append()
            && let Some(staging) = self.resolver.staging()
        {
            sync.ensure_columns(&mut self.session, staging, &columns)?;
        }

        self.session.begin()?;
        let outcome = match self
            .resolver
            .apply(&mut self.session, batch, config, self.page_size)
            .and_then(|outcome| self.session.commit().map(|_| outcome))
        {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Err(rollback_err) = self.session.rollback() {
                    warn!("Rollback failed for {}: {}", config.target, rollback_err);
                }
                return Err(e);
            }
        };

        let delta = WriteMetricsDelta {
            processed_rows: batch.len() as u64,
            inserted_rows: outcome.inserted,
            updated_rows: outcome.updated,
            staged_rows: outcome.staged,
            columns_added: columns_added as u64,
        };
        self.metrics.apply(&delta);

        info!(
            "Wrote {} row(s) to {} ({}, {}): {} inserted, {} updated",
            delta.processed_rows,
            config.target,
            self.resolver.name(),
            spec.action,
            delta.inserted_rows,
            delta.updated_rows
        );
        Ok(delta)
    }

    /// Write batches in order, stopping at the first failure
    ///
    /// Batches committed before the failure stay counted in the metrics.
    pub fn write_all<'a>(
        &mut self,
        batches: impl IntoIterator<Item = &'a Batch>,
        config: &WriteConfig,
    ) -> WriteResult<WriteMetricsDelta> {
        let mut total = WriteMetricsDelta::default();
        for batch in batches {
            total.merge(&self.write(batch, config)?);
        }
        Ok(total)
    }
}

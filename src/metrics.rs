//! Write metrics
//!
//! [`WriteMetrics`] accumulates, across every batch written through one
//! [`BatchWriter`](crate::database::BatchWriter), how many rows were
//! processed, inserted, updated, deleted and staged. Counters only grow.

use serde::{Deserialize, Serialize};

/// Effect of a single batch write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteMetricsDelta {
    /// Rows handed to the writer
    pub processed_rows: u64,
    /// Rows newly created in the target
    pub inserted_rows: u64,
    /// Existing target rows overwritten
    pub updated_rows: u64,
    /// Rows loaded into the staging table
    pub staged_rows: u64,
    /// Columns added to the target by schema synchronization
    pub columns_added: u64,
}

impl WriteMetricsDelta {
    /// Add another delta to this one
    pub fn merge(&mut self, other: &WriteMetricsDelta) {
        self.processed_rows += other.processed_rows;
        self.inserted_rows += other.inserted_rows;
        self.updated_rows += other.updated_rows;
        self.staged_rows += other.staged_rows;
        self.columns_added += other.columns_added;
    }
}

/// Running totals for one writer instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteMetrics {
    pub processed_rows: u64,
    pub inserted_rows: u64,
    pub updated_rows: u64,
    /// Never incremented by the write strategies; kept for reporting parity
    pub deleted_rows: u64,
    pub staged_rows: u64,
}

impl WriteMetrics {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a committed batch's counts to the running totals
    pub fn apply(&mut self, delta: &WriteMetricsDelta) {
        self.processed_rows += delta.processed_rows;
        self.inserted_rows += delta.inserted_rows;
        self.updated_rows += delta.updated_rows;
        self.staged_rows += delta.staged_rows;
    }

    /// Counter names and values in reporting order
    pub fn entries(&self) -> [(&'static str, u64); 5] {
        [
            ("processed_rows", self.processed_rows),
            ("inserted_rows", self.inserted_rows),
            ("updated_rows", self.updated_rows),
            ("deleted_rows", self.deleted_rows),
            ("staged_rows", self.staged_rows),
        ]
    }
}

impl std::fmt::Display for WriteMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .entries()
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        write!(f, "{}", parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_accumulates_across_batches() {
        let mut metrics = WriteMetrics::new();
        metrics.apply(&WriteMetricsDelta {
            processed_rows: 3,
            inserted_rows: 2,
            updated_rows: 1,
            staged_rows: 3,
            columns_added: 1,
        });
        metrics.apply(&WriteMetricsDelta {
            processed_rows: 2,
            inserted_rows: 2,
            ..Default::default()
        });

        assert_eq!(metrics.processed_rows, 5);
        assert_eq!(metrics.inserted_rows, 4);
        assert_eq!(metrics.updated_rows, 1);
        assert_eq!(metrics.staged_rows, 3);
        assert_eq!(metrics.deleted_rows, 0);
    }

    #[test]
    fn test_delta_merge() {
        let mut total = WriteMetricsDelta::default();
        total.merge(&WriteMetricsDelta {
            processed_rows: 1,
            inserted_rows: 1,
            ..Default::default()
        });
        total.merge(&WriteMetricsDelta {
            processed_rows: 1,
            updated_rows: 1,
            columns_added: 2,
            ..Default::default()
        });
        assert_eq!(total.processed_rows, 2);
        assert_eq!(total.columns_added, 2);
    }

    #[test]
    fn test_display() {
        let metrics = WriteMetrics {
            processed_rows: 2,
            inserted_rows: 1,
            updated_rows: 1,
            ..Default::default()
        };
        assert_eq!(
            metrics.to_string(),
            "processed_rows=2 inserted_rows=1 updated_rows=1 deleted_rows=0 staged_rows=0"
        );
    }
}

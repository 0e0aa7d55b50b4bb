//! Thread table enumeration into a caller-sized list.
//!
//! One request is one walk. The walk always runs to the end, even once the
//! caller's limit is known to be too small, so an overflow reports the
//! exact number of entries needed instead of a clamped one.

use thiserror::Error;
use tracing::debug;

use erebus_core::{TableError, TaskEntry, TaskTable};
use erebus_protocol::{limit_in_range, MAX_LIST_SIZE};

/// Outcome of a walk that ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Snapshot {
    /// Every observed thread fit; entries are in scan order.
    Complete(Vec<TaskEntry>),

    /// More threads were observed than the limit allows.
    Overflow {
        /// Number of threads observed, always greater than the limit
        required: usize,
    },
}

/// Failures that abort a request. None of them are worth retrying as-is.
#[derive(Debug, Clone, Error)]
pub enum SnapshotError {
    #[error("invalid limit {limit} (expected 0..={MAX_LIST_SIZE})")]
    InvalidLimit { limit: i64 },

    #[error("not enough memory to stage {limit} entries")]
    ResourceExhausted { limit: usize },

    #[error(transparent)]
    TableUnavailable(#[from] TableError),
}

/// Walks `table` once and stages at most `limit` entries.
///
/// # Errors
///
/// - `SnapshotError::InvalidLimit` if `limit` is negative or above
///   `MAX_LIST_SIZE`; the table is not walked
/// - `SnapshotError::ResourceExhausted` if the staging buffer cannot be
///   allocated
/// - `SnapshotError::TableUnavailable` if the table cannot be read
pub fn enumerate(table: &dyn TaskTable, limit: i64) -> Result<Snapshot, SnapshotError> {
    if !limit_in_range(limit) {
        debug!(limit, "Get process list: invalid limit");
        return Err(SnapshotError::InvalidLimit { limit });
    }

    let capacity = usize::try_from(limit).map_err(|_| SnapshotError::InvalidLimit { limit })?;

    let mut staged: Vec<TaskEntry> = Vec::new();
    staged
        .try_reserve_exact(capacity)
        .map_err(|_| SnapshotError::ResourceExhausted { limit: capacity })?;

    let mut observed = 0usize;
    table.walk(&mut |entry| {
        if observed < capacity {
            staged.push(entry);
        }
        observed += 1;
    })?;

    if observed > capacity {
        debug!(
            available = capacity,
            required = observed,
            "Get process list: not enough space"
        );
        return Ok(Snapshot::Overflow { required: observed });
    }

    debug!(limit, count = observed, "Get process list: complete");
    Ok(Snapshot::Complete(staged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use erebus_core::{MemoryTable, TableResult};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scenario() -> MemoryTable {
        MemoryTable::new(vec![
            TaskEntry::new(1, 10, 2),
            TaskEntry::new(2, 0, 0),
            TaskEntry::new(9, 100, 50),
        ])
    }

    /// Counts walks so tests can prove none happened.
    #[derive(Default)]
    struct CountingTable {
        inner: MemoryTable,
        walks: AtomicUsize,
    }

    impl TaskTable for CountingTable {
        fn walk(&self, visit: &mut dyn FnMut(TaskEntry)) -> TableResult<()> {
            self.walks.fetch_add(1, Ordering::SeqCst);
            self.inner.walk(visit)
        }
    }

    struct BrokenTable;

    impl TaskTable for BrokenTable {
        fn walk(&self, _visit: &mut dyn FnMut(TaskEntry)) -> TableResult<()> {
            Err(TableError::unavailable("/proc", "not mounted"))
        }
    }

    #[test]
    fn test_overflow_reports_true_count() {
        let table = scenario();
        assert_eq!(
            enumerate(&table, 1).unwrap(),
            Snapshot::Overflow { required: 3 }
        );
    }

    #[test]
    fn test_exact_fit_is_complete() {
        let table = scenario();
        let Snapshot::Complete(entries) = enumerate(&table, 3).unwrap() else {
            panic!("expected complete snapshot");
        };
        assert_eq!(
            entries,
            vec![
                TaskEntry::new(1, 10, 2),
                TaskEntry::new(2, 0, 0),
                TaskEntry::new(9, 100, 50),
            ]
        );
    }

    #[test]
    fn test_spare_capacity_is_complete() {
        let table = scenario();
        let Snapshot::Complete(entries) = enumerate(&table, 512).unwrap() else {
            panic!("expected complete snapshot");
        };
        assert_eq!(entries.len(), 3);
    }

    #[test]
    fn test_zero_limit_on_empty_table() {
        let table = MemoryTable::default();
        assert_eq!(enumerate(&table, 0).unwrap(), Snapshot::Complete(vec![]));
    }

    #[test]
    fn test_zero_limit_on_busy_table_overflows() {
        let table = scenario();
        assert_eq!(
            enumerate(&table, 0).unwrap(),
            Snapshot::Overflow { required: 3 }
        );
    }

    #[test]
    fn test_invalid_limits_do_not_walk() {
        let table = CountingTable::default();

        for limit in [-1, i64::MIN, MAX_LIST_SIZE + 1, i64::MAX] {
            assert!(matches!(
                enumerate(&table, limit),
                Err(SnapshotError::InvalidLimit { .. })
            ));
        }
        assert_eq!(table.walks.load(Ordering::SeqCst), 0);

        enumerate(&table, MAX_LIST_SIZE).unwrap();
        assert_eq!(table.walks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_table_failure_propagates() {
        assert!(matches!(
            enumerate(&BrokenTable, 10),
            Err(SnapshotError::TableUnavailable(_))
        ));
    }

    #[test]
    fn test_quiescent_table_is_repeatable() {
        let table = scenario();
        assert_eq!(enumerate(&table, 8).unwrap(), enumerate(&table, 8).unwrap());
    }
}

//! The live thread table that snapshots are taken from.
//!
//! A [`TaskTable`] is walked once per snapshot request. The walk visits
//! every thread of every process exactly once, in a stable order for a
//! quiescent table. Tables are shared with whatever else is creating and
//! reaping tasks, so implementations must tolerate entries vanishing
//! mid-walk: a vanished task is skipped, never reported as an error.

use std::path::PathBuf;
use std::sync::RwLock;

use tracing::{debug, trace};

use crate::error::{TableError, TableResult};
use crate::task::TaskEntry;

/// Default procfs mount point.
pub const DEFAULT_PROC_ROOT: &str = "/proc";

/// A source of live threads.
pub trait TaskTable: Send + Sync {
    /// Visits every live thread once, in scan order.
    ///
    /// # Errors
    ///
    /// Returns `TableError::Unavailable` only if the table cannot be read
    /// at all. Individual tasks that exit during the walk are skipped.
    fn walk(&self, visit: &mut dyn FnMut(TaskEntry)) -> TableResult<()>;
}

// ============================================================================
// procfs
// ============================================================================

/// Thread table backed by `/proc/<pid>/task/<tid>/stat`.
#[derive(Debug, Clone)]
pub struct ProcfsTable {
    root: PathBuf,
}

impl ProcfsTable {
    /// Creates a table reading from the default `/proc` mount.
    pub fn new() -> Self {
        Self::with_root(DEFAULT_PROC_ROOT)
    }

    /// Creates a table reading from a procfs mounted at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for ProcfsTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskTable for ProcfsTable {
    fn walk(&self, visit: &mut dyn FnMut(TaskEntry)) -> TableResult<()> {
        let processes = procfs::process::all_processes_with_root(&self.root)
            .map_err(|e| TableError::unavailable(self.root.display().to_string(), e))?;

        let mut skipped = 0usize;

        for process in processes {
            // Process exited between readdir and open
            let Ok(process) = process else {
                skipped += 1;
                continue;
            };

            let tasks = match process.tasks() {
                Ok(tasks) => tasks,
                Err(e) => {
                    trace!(pid = process.pid, error = %e, "Skipping process without task list");
                    skipped += 1;
                    continue;
                }
            };

            for task in tasks {
                let Ok(task) = task else {
                    skipped += 1;
                    continue;
                };

                match task.stat() {
                    Ok(stat) => {
                        visit(TaskEntry::new(
                            u64::try_from(task.tid).unwrap_or_default(),
                            stat.utime,
                            stat.stime,
                        ));
                    }
                    Err(e) => {
                        trace!(tid = task.tid, error = %e, "Skipping exited thread");
                        skipped += 1;
                    }
                }
            }
        }

        if skipped > 0 {
            debug!(skipped, "Tasks exited during table walk");
        }

        Ok(())
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Thread table held in memory.
///
/// Used for deterministic scenarios and for driving the service without
/// a procfs mount. Mutations and walks are serialized by an internal lock,
/// so every walk sees one consistent version of the table.
#[derive(Debug, Default)]
pub struct MemoryTable {
    tasks: RwLock<Vec<TaskEntry>>,
}

impl MemoryTable {
    pub fn new(tasks: Vec<TaskEntry>) -> Self {
        Self {
            tasks: RwLock::new(tasks),
        }
    }

    /// Adds a thread at the end of the scan order.
    pub fn spawn(&self, entry: TaskEntry) {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        tasks.push(entry);
    }

    /// Removes every thread with `pid`. Returns true if any was removed.
    pub fn exit(&self, pid: u64) -> bool {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        let before = tasks.len();
        tasks.retain(|t| t.pid != pid);
        tasks.len() != before
    }

    /// Replaces the whole table.
    pub fn replace(&self, entries: Vec<TaskEntry>) {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        *tasks = entries;
    }

    pub fn len(&self) -> usize {
        self.tasks.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TaskTable for MemoryTable {
    fn walk(&self, visit: &mut dyn FnMut(TaskEntry)) -> TableResult<()> {
        let tasks = self.tasks.read().unwrap_or_else(|e| e.into_inner());
        for task in tasks.iter() {
            visit(*task);
        }
        Ok(())
    }
}

//! Task entries: one observed thread and its accumulated CPU time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single schedulable thread as seen during a table walk.
///
/// Times are in clock ticks (`USER_HZ`), the unit `/proc/<pid>/task/<tid>/stat`
/// reports. `pid` is the thread id, matching what the scheduler calls a task pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TaskEntry {
    pub pid: u64,
    pub user_time: u64,
    pub kernel_time: u64,
}

impl TaskEntry {
    pub const fn new(pid: u64, user_time: u64, kernel_time: u64) -> Self {
        Self {
            pid,
            user_time,
            kernel_time,
        }
    }
}

impl fmt::Display for TaskEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} u={} k={}", self.pid, self.user_time, self.kernel_time)
    }
}

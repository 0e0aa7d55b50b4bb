//! Client configuration.

use std::path::PathBuf;

use erebus_protocol::{device_path, root_dir_from_env};

/// Capacity of the task list before the first overflow.
pub const DEFAULT_INITIAL_CAPACITY: usize = 512;

/// Entries added beyond the reported requirement when growing.
pub const DEFAULT_GROWTH_SLACK: usize = 256;

/// Configuration for an `ErebusDriver`.
///
/// # Example
///
/// ```rust
/// use erebus_client::DriverConfig;
///
/// let config = DriverConfig {
///     devno: 1,
///     initial_capacity: 64,
///     ..Default::default()
/// };
/// assert!(config.device_path().ends_with("dev/erebus1"));
/// ```
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Root the endpoint lives under; from `EREBUS_ROOT_DIR`, else `/`
    pub root_dir: PathBuf,

    /// Endpoint number
    pub devno: u32,

    /// Task list capacity on first use
    pub initial_capacity: usize,

    /// Extra entries allocated on each growth
    pub growth_slack: usize,

    /// Thread id the session is opened for; the calling thread by default
    pub tid: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            root_dir: root_dir_from_env(),
            devno: 0,
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            growth_slack: DEFAULT_GROWTH_SLACK,
            tid: current_tid(),
        }
    }
}

impl DriverConfig {
    /// Path of the configured endpoint.
    pub fn device_path(&self) -> PathBuf {
        device_path(&self.root_dir, self.devno)
    }
}

/// Kernel thread id of the calling thread.
pub fn current_tid() -> u64 {
    // SAFETY: gettid has no preconditions and cannot fail
    let tid = unsafe { libc::gettid() };
    u64::try_from(tid).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DriverConfig::default();
        assert_eq!(config.devno, 0);
        assert_eq!(config.initial_capacity, 512);
        assert_eq!(config.growth_slack, 256);
        assert_eq!(config.tid, current_tid());
    }

    #[test]
    fn test_device_path_uses_root() {
        let config = DriverConfig {
            root_dir: PathBuf::from("/jail"),
            devno: 3,
            ..Default::default()
        };
        assert_eq!(config.device_path(), PathBuf::from("/jail/dev/erebus3"));
    }

    #[test]
    fn test_threads_have_distinct_tids() {
        let here = current_tid();
        let there = std::thread::spawn(current_tid).join().unwrap();
        assert_ne!(here, there);
    }
}

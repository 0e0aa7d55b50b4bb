//! The growing task list and its retry loop.
//!
//! # Growth
//!
//! ```text
//!   capacity C ──get_process_list──▶ Complete(n) ──▶ visit entries, return n
//!        ▲                      │
//!        │                      └──▶ Overflow(required)
//!        │                                 │
//!        └── C' = max(required + slack, C + 1), clamped to MAX_LIST_SIZE
//! ```
//!
//! The list lives for as long as the driver and never shrinks, so a
//! steady-state table is enumerated in one round trip.

use tokio::sync::Mutex;
use tracing::debug;

use erebus_core::TaskEntry;
use erebus_protocol::{ProcessList, WireError, MAX_LIST_SIZE};

use crate::config::DriverConfig;
use crate::device::{Device, Fetch, SocketDevice};
use crate::error::{DriverError, Result};

/// Largest capacity a list may grow to.
const MAX_CAPACITY: usize = MAX_LIST_SIZE as usize;

/// A client handle owning one session and one reusable task list.
///
/// Calls on one handle are serialized; separate handles are independent.
pub struct ErebusDriver<D: Device = SocketDevice> {
    device: D,
    tasks: Mutex<ProcessList>,
    initial_capacity: usize,
    growth_slack: usize,
}

impl ErebusDriver<SocketDevice> {
    /// Opens a session on the configured endpoint.
    pub async fn connect(config: &DriverConfig) -> Result<Self> {
        let device = SocketDevice::open(&config.device_path(), config.tid).await?;
        Ok(Self::with_device(
            device,
            config.initial_capacity,
            config.growth_slack,
        ))
    }
}

impl<D: Device> ErebusDriver<D> {
    /// Wraps an already-open device.
    ///
    /// The list is allocated on first use, at `initial_capacity` entries
    /// (clamped to `MAX_LIST_SIZE`).
    pub fn with_device(device: D, initial_capacity: usize, growth_slack: usize) -> Self {
        Self {
            device,
            tasks: Mutex::new(ProcessList::new()),
            initial_capacity: initial_capacity.min(MAX_CAPACITY),
            growth_slack,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Current list capacity, in entries.
    pub async fn capacity(&self) -> usize {
        self.tasks.lock().await.limit()
    }

    /// Snapshots the thread table and presents each entry to `visit` in
    /// scan order, stopping early when `visit` returns `false`.
    ///
    /// Returns the number of entries in the snapshot, whether or not
    /// `visit` saw all of them.
    ///
    /// # Errors
    ///
    /// Overflow is retried with a larger list and never returned. Every
    /// other failure ends the call:
    /// - `DriverError::TableTooLarge` if the table needs more than
    ///   `MAX_LIST_SIZE` entries
    /// - `DriverError::ResourceExhausted` if the list cannot grow
    /// - anything the device reports
    pub async fn enumerate_tasks<F>(&self, mut visit: F) -> Result<usize>
    where
        F: FnMut(TaskEntry) -> bool + Send,
    {
        let mut list = self.tasks.lock().await;
        grow(&mut list, self.initial_capacity)?;

        let count = loop {
            match self.device.get_process_list(&mut list).await? {
                Fetch::Complete(count) => break count,
                Fetch::Overflow { required } => {
                    let current = list.limit();
                    let next = next_capacity(current, required, self.growth_slack)?;
                    debug!(current, required, next, "Growing task list");
                    grow(&mut list, next)?;
                }
            }
        };

        for entry in list.entries() {
            if !visit(entry) {
                break;
            }
        }
        Ok(count)
    }

    /// Collects one snapshot.
    pub async fn snapshot(&self) -> Result<Vec<TaskEntry>> {
        let mut tasks = Vec::new();
        self.enumerate_tasks(|task| {
            tasks.push(task);
            true
        })
        .await?;
        Ok(tasks)
    }

    /// Releases the session.
    pub async fn close(self) -> Result<()> {
        self.device.close().await
    }
}

/// Capacity to retry with after an overflow reporting `required`.
fn next_capacity(current: usize, required: usize, slack: usize) -> Result<usize> {
    if required > MAX_CAPACITY {
        return Err(DriverError::TableTooLarge {
            required,
            max: MAX_CAPACITY,
        });
    }

    let next = required
        .saturating_add(slack)
        .max(current.saturating_add(1))
        .min(MAX_CAPACITY);

    if next <= current {
        return Err(DriverError::TableTooLarge {
            required,
            max: MAX_CAPACITY,
        });
    }
    Ok(next)
}

fn grow(list: &mut ProcessList, limit: usize) -> Result<()> {
    list.grow(limit).map_err(|e| match e {
        WireError::OutOfMemory { entries } => DriverError::ResourceExhausted { limit: entries },
        other => DriverError::Wire(other),
    })
}

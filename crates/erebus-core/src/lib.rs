//! Erebus Core - Shared types for thread-table snapshots
//!
//! This crate provides the core domain types shared between
//! the daemon (erebusd) and the client library (erebus-client).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod identity;
pub mod table;
pub mod task;

// Re-exports for convenience
pub use error::{TableError, TableResult};
pub use identity::ClientIdentity;
pub use table::{MemoryTable, ProcfsTable, TaskTable};
pub use task::TaskEntry;

//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur while walking a thread table.
///
/// Tasks that disappear between being listed and being read are not
/// errors; only a table that cannot be read at all is reported.
#[derive(Error, Debug, Clone)]
pub enum TableError {
    /// The table root could not be listed (procfs missing, permissions)
    #[error("thread table unavailable at {root}: {reason}")]
    Unavailable { root: String, reason: String },
}

impl TableError {
    /// Creates an unavailable error from any displayable cause.
    pub fn unavailable(root: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            root: root.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for table operations.
pub type TableResult<T> = Result<T, TableError>;

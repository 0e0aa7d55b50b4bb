//! Session records, registry errors and removal reasons.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::trace;

use erebus_core::ClientIdentity;

/// An open session.
///
/// Records are immutable once published. The registry hands out shared
/// references; a record outlives its removal for as long as any reader
/// still holds one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Identity holding the session
    pub identity: ClientIdentity,

    /// Device number of the endpoint the session was opened on
    pub devno: u32,

    /// When the session was admitted
    pub opened_at: DateTime<Utc>,
}

impl Session {
    pub fn new(identity: ClientIdentity, devno: u32) -> Self {
        Self {
            identity,
            devno,
            opened_at: Utc::now(),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        trace!(client = %self.identity, "Session record reclaimed");
    }
}

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The identity already holds an open session.
    #[error("session already open for {0}")]
    AlreadyOpen(ClientIdentity),

    /// The identity holds no session.
    #[error("no session open for {0}")]
    NotOpen(ClientIdentity),
}

/// Reason why a session was removed from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Client sent Close.
    Explicit,

    /// The connection ended without Close (client exited or crashed).
    ConnectionLost,
}

impl std::fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Explicit => write!(f, "explicitly closed"),
            Self::ConnectionLost => write!(f, "connection lost"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_error_display() {
        let err = RegistryError::AlreadyOpen(ClientIdentity::new(10, 11));
        assert_eq!(err.to_string(), "session already open for 10:11");

        let err = RegistryError::NotOpen(ClientIdentity::new(10, 12));
        assert_eq!(err.to_string(), "no session open for 10:12");
    }

    #[test]
    fn test_removal_reason_display() {
        assert_eq!(RemovalReason::Explicit.to_string(), "explicitly closed");
        assert_eq!(RemovalReason::ConnectionLost.to_string(), "connection lost");
    }
}

//! Error types for the Erebus client.
//!
//! Overflow is not here: it is absorbed by the driver's growth loop and
//! never reaches the caller. Everything below ends the current call.

use std::path::PathBuf;

use thiserror::Error;

use erebus_protocol::{FrameError, ProtocolVersion, Status, WireError};

// ============================================================================
// Driver Error Type
// ============================================================================

#[derive(Error, Debug)]
pub enum DriverError {
    /// The endpoint could not be reached.
    ///
    /// Usually the daemon is not running, or `EREBUS_ROOT_DIR` points
    /// somewhere else than the daemon's root.
    #[error("Cannot connect to {path}: {error}")]
    Connect { path: PathBuf, error: String },

    /// This thread already holds a session.
    #[error("A session is already open for this thread")]
    AlreadyOpen,

    #[error("No session is open")]
    NotOpen,

    #[error("Service rejected limit {limit}")]
    InvalidLimit { limit: i64 },

    /// Either side could not allocate a list of `limit` entries.
    #[error("Not enough memory for {limit} entries")]
    ResourceExhausted { limit: usize },

    /// The table needs more entries than any list may hold.
    #[error("Thread table needs {required} entries, more than the maximum {max}")]
    TableTooLarge { required: usize, max: usize },

    #[error("Protocol version mismatch: client {client}, server {server}")]
    VersionMismatch {
        client: ProtocolVersion,
        server: String,
    },

    #[error("Service does not support opcode {opcode}")]
    Unsupported { opcode: u8 },

    #[error("Service cannot read its thread table")]
    TableUnavailable,

    #[error("Unexpected {status} reply to opcode {opcode}")]
    UnexpectedStatus { opcode: u8, status: Status },

    #[error("Reply for opcode {received} arrived for request {sent}")]
    MismatchedReply { sent: u8, received: u8 },

    /// The reply did not match the request (boundary failure).
    #[error("Malformed reply: {0}")]
    Wire(#[from] WireError),

    #[error("Malformed frame: {0}")]
    Frame(#[from] FrameError),

    #[error("Service closed the connection")]
    Disconnected,

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for DriverError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, DriverError>;

//! Client identities used as session registry keys.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a client that may hold a session.
///
/// `pid` comes from the peer credentials of the endpoint connection and
/// cannot be forged; `tid` is the opening thread as reported by the client.
/// Two connections from different threads of one process are distinct
/// identities, two connections from the same thread are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientIdentity {
    pub pid: u32,
    pub tid: u64,
}

impl ClientIdentity {
    pub const fn new(pid: u32, tid: u64) -> Self {
        Self { pid, tid }
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.pid, self.tid)
    }
}

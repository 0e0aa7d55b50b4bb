//! Session registry with read-copy-update publication.
//!
//! The registry tracks which client identities currently hold an open
//! session. Lookups are frequent (every snapshot request checks its
//! session); opens and releases are rare.
//!
//! # Concurrency
//!
//! ```text
//!   readers ──read lock──▶ Arc<SessionSet> ──clone──▶ lookup (lock released)
//!
//!   writer ──writer mutex──▶ copy set ──modify──▶ swap under write lock
//! ```
//!
//! - Readers take the read lock only long enough to clone an `Arc` of the
//!   published set, so they never wait on each other and wait on a writer
//!   only for the duration of a pointer swap.
//! - Writers serialize on a separate mutex, so a lookup followed by an
//!   insert is atomic with respect to every other open and release.
//! - A reader sees either the whole old set or the whole new set, never a
//!   half-removed record.
//! - A removed record is reclaimed when the last reader holding the old set
//!   (or the record itself) lets go: the `Arc` count is the grace period.
//!
//! # Panic-Free Guarantees
//!
//! Poisoned locks are recovered with `PoisonError::into_inner`: the
//! published set is immutable, so a panicking holder cannot leave it
//! half-written.

mod session;

pub use session::{RegistryError, RemovalReason, Session};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, info};

use erebus_core::ClientIdentity;

type SessionSet = HashMap<ClientIdentity, Arc<Session>>;

/// Tracks open sessions, at most one per identity.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    /// The currently published, immutable set
    published: RwLock<Arc<SessionSet>>,

    /// Serializes writers
    writer: Mutex<()>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits a new session for `identity`.
    ///
    /// # Errors
    ///
    /// - `RegistryError::AlreadyOpen` if `identity` already holds a session
    pub fn open(&self, identity: ClientIdentity, devno: u32) -> Result<Arc<Session>, RegistryError> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let current = self.load();
        if current.contains_key(&identity) {
            debug!(client = %identity, "Already opened for client");
            return Err(RegistryError::AlreadyOpen(identity));
        }

        let session = Arc::new(Session::new(identity, devno));
        let mut next = SessionSet::clone(&current);
        next.insert(identity, Arc::clone(&session));
        self.publish(next);

        info!(client = %identity, devno, sessions = current.len() + 1, "Session opened");
        Ok(session)
    }

    /// Removes the session held by `identity`.
    ///
    /// The returned record stays valid for the caller; its storage is
    /// reclaimed once every concurrent reader has dropped it.
    ///
    /// # Errors
    ///
    /// - `RegistryError::NotOpen` if `identity` holds no session
    pub fn release(
        &self,
        identity: ClientIdentity,
        reason: RemovalReason,
    ) -> Result<Arc<Session>, RegistryError> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let current = self.load();
        let mut next = SessionSet::clone(&current);
        let Some(session) = next.remove(&identity) else {
            return Err(RegistryError::NotOpen(identity));
        };
        self.publish(next);

        info!(client = %identity, %reason, sessions = current.len() - 1, "Session released");
        Ok(session)
    }

    /// Looks up the session held by `identity`.
    pub fn find(&self, identity: &ClientIdentity) -> Option<Arc<Session>> {
        self.load().get(identity).cloned()
    }

    /// Number of open sessions.
    pub fn len(&self) -> usize {
        self.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All open sessions, ordered by identity.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<_> = self.load().values().cloned().collect();
        sessions.sort_by_key(|s| s.identity);
        sessions
    }

    fn load(&self) -> Arc<SessionSet> {
        let published = self.published.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&published)
    }

    fn publish(&self, next: SessionSet) {
        let mut published = self.published.write().unwrap_or_else(PoisonError::into_inner);
        *published = Arc::new(next);
    }
}

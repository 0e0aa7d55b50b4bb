//! The service instance shared by every endpoint and session.
//!
//! One `ServiceInstance` is built at startup and handed to the server by
//! `Arc`. It owns the session registry and the thread table; nothing in
//! the daemon keeps this state anywhere else.

use std::sync::Arc;

use bytes::BytesMut;
use tracing::{debug, warn};

use erebus_core::{ClientIdentity, TaskTable};
use erebus_protocol::{encode_list, Frame, ListHeader, Opcode, Status, WireError};

use crate::registry::{RegistryError, RemovalReason, Session, SessionRegistry};
use crate::snapshot::{self, Snapshot, SnapshotError};

/// Registration state, table and call dispatch for one daemon.
pub struct ServiceInstance {
    registry: SessionRegistry,
    table: Arc<dyn TaskTable>,
}

impl ServiceInstance {
    pub fn new(table: Arc<dyn TaskTable>) -> Self {
        Self {
            registry: SessionRegistry::new(),
            table,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Begins a session for `identity` on endpoint `devno`.
    pub fn open(&self, identity: ClientIdentity, devno: u32) -> Result<Arc<Session>, RegistryError> {
        self.registry.open(identity, devno)
    }

    /// Ends the session held by `identity`.
    pub fn release(
        &self,
        identity: ClientIdentity,
        reason: RemovalReason,
    ) -> Result<Arc<Session>, RegistryError> {
        self.registry.release(identity, reason)
    }

    /// Handles a `GetProcessList` call and builds its reply.
    ///
    /// Blocks for the duration of one table walk; async callers should run
    /// it on a blocking worker.
    pub fn get_process_list(&self, identity: &ClientIdentity, request: &[u8]) -> Frame {
        let opcode = Opcode::GetProcessList as u8;

        if self.registry.find(identity).is_none() {
            warn!(client = %identity, "Get process list without an open session");
            return Frame::status_only(opcode, Status::NotOpen);
        }

        let header = match ListHeader::decode(request) {
            Ok(header) => header,
            Err(e @ (WireError::BadMagic { .. } | WireError::VersionMismatch { .. })) => {
                warn!(client = %identity, error = %e, "Rejecting list from incompatible client");
                return Frame::status_only(opcode, Status::VersionMismatch);
            }
            Err(e) => {
                warn!(client = %identity, error = %e, "Malformed list request");
                return Frame::status_only(opcode, Status::BadMessage);
            }
        };

        debug!(client = %identity, limit = header.limit, "Get process list");

        match snapshot::enumerate(self.table.as_ref(), header.limit) {
            Ok(Snapshot::Complete(entries)) => {
                let body = encode_list(header.limit, &entries);
                debug!(
                    client = %identity,
                    bytes = body.len(),
                    entries = entries.len(),
                    "Copied process list to client"
                );
                Frame::reply(opcode, Status::Ok, body.freeze())
            }
            Ok(Snapshot::Overflow { required }) => {
                // Only the header goes back: the required count
                let mut body = BytesMut::new();
                ListHeader::reply(i64::try_from(required).unwrap_or(i64::MAX), header.limit)
                    .encode(&mut body);
                Frame::reply(opcode, Status::Overflow, body.freeze())
            }
            Err(SnapshotError::InvalidLimit { .. }) => {
                Frame::status_only(opcode, Status::InvalidArgument)
            }
            Err(e @ SnapshotError::ResourceExhausted { .. }) => {
                warn!(client = %identity, error = %e, "Not enough memory");
                Frame::status_only(opcode, Status::OutOfMemory)
            }
            Err(e @ SnapshotError::TableUnavailable(_)) => {
                warn!(client = %identity, error = %e, "Thread table unavailable");
                Frame::status_only(opcode, Status::TableUnavailable)
            }
        }
    }
}

impl std::fmt::Debug for ServiceInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceInstance")
            .field("sessions", &self.registry.len())
            .finish_non_exhaustive()
    }
}

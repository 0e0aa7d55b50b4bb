//! Connection handler for individual client connections.
//!
//! Each client connection gets its own `ConnectionHandler` that:
//! - Learns the peer's process id from the socket credentials
//! - Decodes incoming frames and routes them to the service
//! - Releases the connection's session when the connection ends
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Connection errors are logged and result in graceful disconnect

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio::time::timeout;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use erebus_core::ClientIdentity;
use erebus_protocol::{
    frame_codec, Frame, OpenRequest, Opcode, ProtocolVersion, Status, VersionStamp, WireError,
};

use crate::registry::{RegistryError, RemovalReason};
use crate::service::ServiceInstance;

/// Write timeout (10 seconds)
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// What the loop does after a reply is sent.
enum Next {
    Continue,
    Disconnect,
}

/// Connection handler for a single client.
///
/// Holds at most one session. The session belongs to the connection: it
/// is released when the client sends `Close` or when the connection ends
/// for any other reason.
pub struct ConnectionHandler {
    /// Length-delimited frame stream
    framed: Framed<UnixStream, LengthDelimitedCodec>,

    /// Shared registry, table and dispatch
    service: Arc<ServiceInstance>,

    /// Endpoint this connection arrived on
    devno: u32,

    /// Process id from the peer credentials
    peer_pid: u32,

    /// Identity of the open session, if any
    identity: Option<ClientIdentity>,

    /// Unique number for this connection
    connection_number: u64,
}

impl ConnectionHandler {
    /// Creates a new connection handler.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::PeerCredentials` if the peer's process id cannot
    ///   be determined
    pub fn new(
        stream: UnixStream,
        service: Arc<ServiceInstance>,
        devno: u32,
        connection_number: u64,
    ) -> Result<Self, ConnectionError> {
        let cred = stream
            .peer_cred()
            .map_err(|e| ConnectionError::PeerCredentials(e.to_string()))?;
        let peer_pid = cred
            .pid()
            .and_then(|pid| u32::try_from(pid).ok())
            .ok_or_else(|| ConnectionError::PeerCredentials("peer pid unavailable".to_string()))?;

        Ok(Self {
            framed: Framed::new(stream, frame_codec()),
            service,
            devno,
            peer_pid,
            identity: None,
            connection_number,
        })
    }

    /// Runs the connection handler until the peer disconnects, sends
    /// `Close`, or the server shuts down.
    pub async fn run(mut self, cancel_token: CancellationToken) {
        debug!(
            connection = self.connection_number,
            devno = self.devno,
            peer_pid = self.peer_pid,
            "New client connected"
        );

        if let Err(e) = self.process_frames(&cancel_token).await {
            debug!(
                connection = self.connection_number,
                error = %e,
                "Connection closed"
            );
        }

        if let Some(identity) = self.identity.take() {
            match self.service.release(identity, RemovalReason::ConnectionLost) {
                Ok(_) => {}
                Err(e) => debug!(client = %identity, error = %e, "Session already gone"),
            }
        }

        info!(connection = self.connection_number, "Client disconnected");
    }

    async fn process_frames(&mut self, cancel_token: &CancellationToken) -> Result<(), ConnectionError> {
        loop {
            let payload = tokio::select! {
                _ = cancel_token.cancelled() => {
                    debug!(connection = self.connection_number, "Server shutting down");
                    return Ok(());
                }

                next = self.framed.next() => match next {
                    Some(Ok(payload)) => payload,
                    Some(Err(e)) => return Err(ConnectionError::Io(e.to_string())),
                    None => {
                        debug!(connection = self.connection_number, "Client sent EOF");
                        return Ok(());
                    }
                },
            };

            let (reply, next) = self.handle_payload(payload).await?;
            self.send_frame(reply).await?;

            if let Next::Disconnect = next {
                return Ok(());
            }
        }
    }

    async fn handle_payload(&mut self, payload: BytesMut) -> Result<(Frame, Next), ConnectionError> {
        let raw_opcode = payload.first().copied().unwrap_or(0);

        let frame = match Frame::decode(payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(connection = self.connection_number, error = %e, "Malformed frame");
                return Ok((Frame::status_only(raw_opcode, Status::BadMessage), Next::Continue));
            }
        };

        let opcode = match frame.opcode() {
            Ok(opcode) => opcode,
            Err(e) => {
                debug!(connection = self.connection_number, error = %e, "Unsupported call");
                return Ok((Frame::status_only(frame.opcode, Status::Unsupported), Next::Continue));
            }
        };

        match opcode {
            Opcode::Open => Ok((self.handle_open(&frame.body), Next::Continue)),
            Opcode::Close => Ok(self.handle_close()),
            Opcode::GetProcessList => {
                let reply = self.handle_get_process_list(frame.body).await?;
                Ok((reply, Next::Continue))
            }
        }
    }

    fn handle_open(&mut self, body: &[u8]) -> Frame {
        let opcode = Opcode::Open as u8;

        if let Some(identity) = self.identity {
            debug!(client = %identity, "Open on a connection that already holds a session");
            return Frame::status_only(opcode, Status::AlreadyOpen);
        }

        let request = match OpenRequest::decode(body) {
            Ok(request) => request,
            Err(e @ (WireError::BadMagic { .. } | WireError::VersionMismatch { .. })) => {
                warn!(
                    connection = self.connection_number,
                    server_version = %ProtocolVersion::CURRENT,
                    error = %e,
                    "Protocol version mismatch"
                );
                return Frame::reply(opcode, Status::VersionMismatch, stamp_body());
            }
            Err(e) => {
                warn!(connection = self.connection_number, error = %e, "Malformed open request");
                return Frame::status_only(opcode, Status::BadMessage);
            }
        };

        let identity = ClientIdentity::new(self.peer_pid, request.tid);
        match self.service.open(identity, self.devno) {
            Ok(_) => {
                self.identity = Some(identity);
                Frame::reply(opcode, Status::Ok, stamp_body())
            }
            Err(RegistryError::AlreadyOpen(_)) => Frame::status_only(opcode, Status::AlreadyOpen),
            Err(RegistryError::NotOpen(_)) => Frame::status_only(opcode, Status::NotOpen),
        }
    }

    fn handle_close(&mut self) -> (Frame, Next) {
        let opcode = Opcode::Close as u8;

        let Some(identity) = self.identity.take() else {
            debug!(connection = self.connection_number, "Close without an open session");
            return (Frame::status_only(opcode, Status::NotOpen), Next::Continue);
        };

        match self.service.release(identity, RemovalReason::Explicit) {
            Ok(_) => (Frame::status_only(opcode, Status::Ok), Next::Disconnect),
            Err(_) => (Frame::status_only(opcode, Status::NotOpen), Next::Disconnect),
        }
    }

    async fn handle_get_process_list(&mut self, body: Bytes) -> Result<Frame, ConnectionError> {
        let Some(identity) = self.identity else {
            return Ok(Frame::status_only(Opcode::GetProcessList as u8, Status::NotOpen));
        };

        // The walk blocks on the table; keep it off the reactor
        let service = Arc::clone(&self.service);
        tokio::task::spawn_blocking(move || service.get_process_list(&identity, &body))
            .await
            .map_err(|e| {
                error!(client = %identity, error = %e, "Snapshot worker failed");
                ConnectionError::Worker(e.to_string())
            })
    }

    async fn send_frame(&mut self, frame: Frame) -> Result<(), ConnectionError> {
        match timeout(WRITE_TIMEOUT, self.framed.send(frame.encode())).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
            Err(_) => Err(ConnectionError::WriteTimeout),
        }
    }
}

fn stamp_body() -> Bytes {
    let mut out = BytesMut::new();
    VersionStamp::CURRENT.encode(&mut out);
    out.freeze()
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Write timed out")]
    WriteTimeout,

    #[error("Cannot read peer credentials: {0}")]
    PeerCredentials(String),

    #[error("Snapshot worker failed: {0}")]
    Worker(String),
}

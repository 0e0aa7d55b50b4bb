//! One open session on an endpoint.
//!
//! `Device` is the seam between the growth loop and the transport: the
//! driver only needs "try to fill this list" and "close". `SocketDevice`
//! is the real endpoint; tests substitute scripted devices.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, info};

use erebus_protocol::{
    frame_codec, Frame, OpenRequest, Opcode, ProcessList, ProtocolVersion, Status, VersionStamp,
};

use crate::error::{DriverError, Result};

/// Outcome of one fill attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetch {
    /// The list now holds this many entries.
    Complete(usize),

    /// The list was too small; nothing was written.
    Overflow { required: usize },
}

/// An endpoint session the driver can fill lists from.
#[async_trait]
pub trait Device: Send + Sync {
    /// Asks the service to copy the thread table into `list`.
    async fn get_process_list(&self, list: &mut ProcessList) -> Result<Fetch>;

    /// Releases the session.
    async fn close(&self) -> Result<()>;
}

/// A session on a Unix socket endpoint.
pub struct SocketDevice {
    path: PathBuf,
    framed: Mutex<Framed<UnixStream, LengthDelimitedCodec>>,
    server_version: ProtocolVersion,
}

impl SocketDevice {
    /// Connects to `path` and opens a session for thread `tid`.
    ///
    /// # Errors
    ///
    /// - `DriverError::Connect` if the endpoint cannot be reached
    /// - `DriverError::AlreadyOpen` if `tid` already holds a session
    /// - `DriverError::VersionMismatch` if the service speaks another layout
    pub async fn open(path: &Path, tid: u64) -> Result<Self> {
        let stream = UnixStream::connect(path)
            .await
            .map_err(|e| DriverError::Connect {
                path: path.to_path_buf(),
                error: e.to_string(),
            })?;
        let mut framed = Framed::new(stream, frame_codec());

        let reply = round_trip(
            &mut framed,
            Frame::request(Opcode::Open, OpenRequest::new(tid).encode()),
        )
        .await?;

        let server_version = match reply.status {
            Status::Ok => VersionStamp::decode_checked(&reply.body)?.version,
            Status::AlreadyOpen => return Err(DriverError::AlreadyOpen),
            Status::VersionMismatch => {
                let server = VersionStamp::decode(&reply.body)
                    .map(|stamp| stamp.version.to_string())
                    .unwrap_or_else(|_| "unknown".to_string());
                return Err(DriverError::VersionMismatch {
                    client: ProtocolVersion::CURRENT,
                    server,
                });
            }
            other => return Err(unexpected(Opcode::Open, other)),
        };

        info!(
            endpoint = %path.display(),
            tid,
            server_version = %server_version,
            "Session opened"
        );

        Ok(Self {
            path: path.to_path_buf(),
            framed: Mutex::new(framed),
            server_version,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Layout version the service reported on open.
    pub fn server_version(&self) -> ProtocolVersion {
        self.server_version
    }

    async fn call(&self, frame: Frame) -> Result<Frame> {
        let mut framed = self.framed.lock().await;
        round_trip(&mut framed, frame).await
    }
}

#[async_trait]
impl Device for SocketDevice {
    async fn get_process_list(&self, list: &mut ProcessList) -> Result<Fetch> {
        let request = list.request();
        let mut body = BytesMut::new();
        request.encode(&mut body);

        let reply = self
            .call(Frame::request(Opcode::GetProcessList, body.freeze()))
            .await?;

        match reply.status {
            Status::Ok => Ok(Fetch::Complete(list.fill(&reply.body)?)),
            Status::Overflow => Ok(Fetch::Overflow {
                required: list.read_overflow(&reply.body)?,
            }),
            Status::NotOpen => Err(DriverError::NotOpen),
            Status::InvalidArgument => Err(DriverError::InvalidLimit {
                limit: request.limit,
            }),
            Status::OutOfMemory => Err(DriverError::ResourceExhausted {
                limit: list.limit(),
            }),
            Status::VersionMismatch => Err(DriverError::VersionMismatch {
                client: ProtocolVersion::CURRENT,
                server: self.server_version.to_string(),
            }),
            Status::TableUnavailable => Err(DriverError::TableUnavailable),
            other => Err(unexpected(Opcode::GetProcessList, other)),
        }
    }

    async fn close(&self) -> Result<()> {
        let reply = self.call(Frame::request(Opcode::Close, Bytes::new())).await?;
        match reply.status {
            Status::Ok => {
                debug!(endpoint = %self.path.display(), "Session closed");
                Ok(())
            }
            Status::NotOpen => Err(DriverError::NotOpen),
            other => Err(unexpected(Opcode::Close, other)),
        }
    }
}

async fn round_trip(
    framed: &mut Framed<UnixStream, LengthDelimitedCodec>,
    frame: Frame,
) -> Result<Frame> {
    let sent = frame.opcode;
    framed.send(frame.encode()).await?;

    let payload = match framed.next().await {
        Some(payload) => payload?,
        None => return Err(DriverError::Disconnected),
    };
    let reply = Frame::decode(payload)?;

    if reply.opcode != sent {
        return Err(DriverError::MismatchedReply {
            sent,
            received: reply.opcode,
        });
    }
    if reply.status == Status::Unsupported {
        return Err(DriverError::Unsupported {
            opcode: reply.opcode,
        });
    }
    Ok(reply)
}

fn unexpected(opcode: Opcode, status: Status) -> DriverError {
    DriverError::UnexpectedStatus {
        opcode: opcode as u8,
        status,
    }
}

//! Opcode/status framing for endpoint calls.
//!
//! Frames are length-delimited on the stream (`u32` big-endian prefix).
//! Each payload is:
//!
//! ```text
//! +-------------+-------------+------------------+
//! | opcode (u8) | status (u8) | body             |
//! +-------------+-------------+------------------+
//! ```
//!
//! Requests carry `Status::Ok` in the status byte. Replies echo the
//! request's opcode byte, even when the opcode was not understood.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use thiserror::Error;
use tokio_util::codec::LengthDelimitedCodec;

use crate::version::{VersionStamp, STAMP_SIZE};
use crate::wire::{WireError, ENTRY_SIZE, HEADER_SIZE, MAX_LIST_SIZE};

/// Opcode and status bytes in front of every body.
pub const FRAME_PREFIX: usize = 2;

/// Largest frame either side will accept: a full list at `MAX_LIST_SIZE`.
pub const MAX_FRAME_SIZE: usize = FRAME_PREFIX + HEADER_SIZE + (MAX_LIST_SIZE as usize) * ENTRY_SIZE;

/// Builds the length-delimited codec both sides use.
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_SIZE)
        .new_codec()
}

/// Endpoint calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Begin using the service
    Open = 1,
    /// Stop using the service
    Close = 2,
    /// Snapshot the thread table into a caller-sized list
    GetProcessList = 3,
}

impl TryFrom<u8> for Opcode {
    type Error = FrameError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Self::Open),
            2 => Ok(Self::Close),
            3 => Ok(Self::GetProcessList),
            other => Err(FrameError::UnknownOpcode(other)),
        }
    }
}

/// Result codes carried by replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    Ok = 0,
    /// The identity already holds a session
    AlreadyOpen = 1,
    /// No session is held by this connection
    NotOpen = 2,
    /// The list was too small; body carries the required count
    Overflow = 3,
    /// The request is outside the accepted domain
    InvalidArgument = 4,
    /// The service could not allocate the response
    OutOfMemory = 5,
    /// The opcode is not implemented
    Unsupported = 6,
    /// The frame or its body could not be decoded
    BadMessage = 7,
    /// The peer uses an incompatible layout
    VersionMismatch = 8,
    /// The thread table could not be read
    TableUnavailable = 9,
}

impl TryFrom<u8> for Status {
    type Error = FrameError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Ok),
            1 => Ok(Self::AlreadyOpen),
            2 => Ok(Self::NotOpen),
            3 => Ok(Self::Overflow),
            4 => Ok(Self::InvalidArgument),
            5 => Ok(Self::OutOfMemory),
            6 => Ok(Self::Unsupported),
            7 => Ok(Self::BadMessage),
            8 => Ok(Self::VersionMismatch),
            9 => Ok(Self::TableUnavailable),
            other => Err(FrameError::UnknownStatus(other)),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "ok",
            Self::AlreadyOpen => "already open",
            Self::NotOpen => "not open",
            Self::Overflow => "overflow",
            Self::InvalidArgument => "invalid argument",
            Self::OutOfMemory => "out of memory",
            Self::Unsupported => "unsupported",
            Self::BadMessage => "bad message",
            Self::VersionMismatch => "version mismatch",
            Self::TableUnavailable => "table unavailable",
        };
        f.write_str(name)
    }
}

/// Errors decoding a frame prefix.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame too short: {len} bytes")]
    Truncated { len: usize },

    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),

    #[error("unknown status {0}")]
    UnknownStatus(u8),
}

/// One request or reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw opcode byte, kept raw so unknown opcodes can be answered
    pub opcode: u8,
    pub status: Status,
    pub body: Bytes,
}

impl Frame {
    pub fn request(opcode: Opcode, body: impl Into<Bytes>) -> Self {
        Self {
            opcode: opcode as u8,
            status: Status::Ok,
            body: body.into(),
        }
    }

    pub fn reply(opcode: u8, status: Status, body: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            status,
            body: body.into(),
        }
    }

    /// A reply with no body.
    pub fn status_only(opcode: u8, status: Status) -> Self {
        Self::reply(opcode, status, Bytes::new())
    }

    /// The decoded opcode.
    pub fn opcode(&self) -> Result<Opcode, FrameError> {
        Opcode::try_from(self.opcode)
    }

    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(FRAME_PREFIX + self.body.len());
        out.put_u8(self.opcode);
        out.put_u8(self.status as u8);
        out.extend_from_slice(&self.body);
        out.freeze()
    }

    pub fn decode(payload: BytesMut) -> Result<Self, FrameError> {
        if payload.len() < FRAME_PREFIX {
            return Err(FrameError::Truncated { len: payload.len() });
        }

        let mut payload = payload.freeze();
        let opcode = payload.get_u8();
        let status = Status::try_from(payload.get_u8())?;

        Ok(Self {
            opcode,
            status,
            body: payload,
        })
    }
}

/// Body of an `Open` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenRequest {
    pub stamp: VersionStamp,
    /// Thread id of the opening thread
    pub tid: u64,
}

impl OpenRequest {
    /// Size of the encoded body.
    pub const SIZE: usize = STAMP_SIZE + 8;

    pub fn new(tid: u64) -> Self {
        Self {
            stamp: VersionStamp::CURRENT,
            tid,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(Self::SIZE);
        self.stamp.encode(&mut out);
        out.put_u64_le(self.tid);
        out.freeze()
    }

    /// Decodes the body, rejecting foreign or incompatible stamps.
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        if body.len() != Self::SIZE {
            return Err(WireError::Truncated {
                expected: Self::SIZE,
                actual: body.len(),
            });
        }

        let stamp = VersionStamp::decode_checked(body)?;
        let mut rest = body.get(STAMP_SIZE..).unwrap_or_default();
        let tid = rest.get_u64_le();

        Ok(Self { stamp, tid })
    }
}

//! Packed process-list layout shared by producer and consumer.
//!
//! ```text
//! offset  size   field
//! 0       8      version stamp (magic u32, major u16, minor u16)
//! 8       8      count  i64
//! 16      8      limit  i64
//! 24      24*n   entries { pid u64, user_time u64, kernel_time u64 }
//! ```
//!
//! All fields are little-endian with no padding. The header and the
//! entry region are handled separately: a request is the header alone,
//! a complete reply is the header followed by exactly `count` entries,
//! and an overflow reply is the header alone with `count` set to the
//! number of entries that would have been needed.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

use erebus_core::TaskEntry;

use crate::version::{ProtocolVersion, VersionStamp, STAMP_SIZE};

/// Upper bound on `limit`, in entries.
pub const MAX_LIST_SIZE: i64 = 1_000_000;

/// Size of the fixed header in bytes.
pub const HEADER_SIZE: usize = STAMP_SIZE + 16;

/// Size of one encoded entry in bytes.
pub const ENTRY_SIZE: usize = 24;

/// Errors raised while encoding or decoding a process-list block.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("bad magic 0x{found:08x}: peer does not speak the erebus layout")]
    BadMagic { found: u32 },

    #[error("incompatible layout version: local {local}, remote {remote}")]
    VersionMismatch {
        local: ProtocolVersion,
        remote: ProtocolVersion,
    },

    #[error("block truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("limit {limit} outside [0, {MAX_LIST_SIZE}]")]
    LimitOutOfRange { limit: i64 },

    #[error("limit not echoed: sent {sent}, got {echoed}")]
    LimitMismatch { sent: i64, echoed: i64 },

    #[error("count {count} inconsistent with limit {limit}")]
    CountOutOfRange { count: i64, limit: i64 },

    #[error("cannot allocate room for {entries} entries")]
    OutOfMemory { entries: usize },
}

/// Returns true if `limit` is inside the accepted request domain.
pub fn limit_in_range(limit: i64) -> bool {
    (0..=MAX_LIST_SIZE).contains(&limit)
}

// ============================================================================
// Header
// ============================================================================

/// The fixed part of a process-list block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListHeader {
    pub stamp: VersionStamp,
    pub count: i64,
    pub limit: i64,
}

impl ListHeader {
    /// A request for up to `limit` entries.
    pub fn request(limit: i64) -> Self {
        Self {
            stamp: VersionStamp::CURRENT,
            count: 0,
            limit,
        }
    }

    /// A reply header echoing `limit`.
    pub fn reply(count: i64, limit: i64) -> Self {
        Self {
            stamp: VersionStamp::CURRENT,
            count,
            limit,
        }
    }

    pub fn encode(&self, out: &mut impl BufMut) {
        self.stamp.encode(out);
        out.put_i64_le(self.count);
        out.put_i64_le(self.limit);
    }

    /// Decodes and validates the stamp of a header. The entry region, if
    /// any, follows at `HEADER_SIZE`.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < HEADER_SIZE {
            return Err(WireError::Truncated {
                expected: HEADER_SIZE,
                actual: buf.len(),
            });
        }

        let stamp = VersionStamp::decode_checked(buf)?;
        let mut rest = buf.get(STAMP_SIZE..HEADER_SIZE).unwrap_or_default();
        let count = rest.get_i64_le();
        let limit = rest.get_i64_le();

        Ok(Self {
            stamp,
            count,
            limit,
        })
    }

    /// Returns true if this reply reports more entries than were asked for.
    pub fn is_overflow(&self) -> bool {
        self.count > self.limit
    }
}

fn encode_entry(entry: &TaskEntry, out: &mut impl BufMut) {
    out.put_u64_le(entry.pid);
    out.put_u64_le(entry.user_time);
    out.put_u64_le(entry.kernel_time);
}

fn decode_entry(mut raw: &[u8]) -> TaskEntry {
    let pid = raw.get_u64_le();
    let user_time = raw.get_u64_le();
    let kernel_time = raw.get_u64_le();
    TaskEntry::new(pid, user_time, kernel_time)
}

/// Encodes a complete reply: header plus every entry in order.
pub fn encode_list(limit: i64, entries: &[TaskEntry]) -> BytesMut {
    let mut out = BytesMut::with_capacity(HEADER_SIZE + entries.len() * ENTRY_SIZE);
    let count = i64::try_from(entries.len()).unwrap_or(i64::MAX);
    ListHeader::reply(count, limit).encode(&mut out);
    for entry in entries {
        encode_entry(entry, &mut out);
    }
    out
}

// ============================================================================
// Reusable client buffer
// ============================================================================

/// A caller-owned process list with room for `limit` entries.
///
/// The entry region only ever grows. A reply is copied in place; on
/// overflow the region is left as it was.
#[derive(Debug, Default)]
pub struct ProcessList {
    limit: usize,
    count: usize,
    region: Vec<u8>,
}

impl ProcessList {
    /// An empty list with no capacity.
    pub fn new() -> Self {
        Self::default()
    }

    /// A list with room for `limit` entries.
    pub fn with_capacity(limit: usize) -> Result<Self, WireError> {
        let mut list = Self::new();
        list.grow(limit)?;
        Ok(list)
    }

    /// Capacity in entries.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of valid entries from the last complete reply.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Grows the entry region to hold at least `limit` entries.
    ///
    /// Smaller values are ignored: the region never shrinks.
    ///
    /// # Errors
    ///
    /// - `WireError::LimitOutOfRange` if `limit` exceeds `MAX_LIST_SIZE`
    /// - `WireError::OutOfMemory` if the region cannot be reallocated
    pub fn grow(&mut self, limit: usize) -> Result<(), WireError> {
        if limit <= self.limit {
            return Ok(());
        }

        let requested = i64::try_from(limit).unwrap_or(i64::MAX);
        if !limit_in_range(requested) {
            return Err(WireError::LimitOutOfRange { limit: requested });
        }

        let bytes = limit * ENTRY_SIZE;
        self.region
            .try_reserve_exact(bytes - self.region.len())
            .map_err(|_| WireError::OutOfMemory { entries: limit })?;
        self.region.resize(bytes, 0);
        self.limit = limit;
        Ok(())
    }

    /// The request header for this list's capacity.
    pub fn request(&self) -> ListHeader {
        ListHeader::request(i64::try_from(self.limit).unwrap_or(i64::MAX))
    }

    /// Copies a complete reply into the entry region.
    ///
    /// Returns the number of entries received.
    ///
    /// # Errors
    ///
    /// Any disagreement between the header and the body (limit not echoed,
    /// count outside `[0, limit]`, body length not `HEADER + count*ENTRY`)
    /// is a boundary failure and leaves the list unchanged.
    pub fn fill(&mut self, body: &[u8]) -> Result<usize, WireError> {
        let header = ListHeader::decode(body)?;
        let sent = self.request().limit;

        if header.limit != sent {
            return Err(WireError::LimitMismatch {
                sent,
                echoed: header.limit,
            });
        }

        if header.count < 0 || header.count > header.limit {
            return Err(WireError::CountOutOfRange {
                count: header.count,
                limit: header.limit,
            });
        }

        let count = usize::try_from(header.count).unwrap_or_default();
        let expected = HEADER_SIZE + count * ENTRY_SIZE;
        if body.len() != expected {
            return Err(WireError::Truncated {
                expected,
                actual: body.len(),
            });
        }

        let payload = body.get(HEADER_SIZE..).unwrap_or_default();
        let target = self
            .region
            .get_mut(..payload.len())
            .ok_or(WireError::CountOutOfRange {
                count: header.count,
                limit: header.limit,
            })?;
        target.copy_from_slice(payload);
        self.count = count;
        Ok(count)
    }

    /// Reads the required count from an overflow reply.
    ///
    /// # Errors
    ///
    /// Returns `WireError::CountOutOfRange` if the header does not actually
    /// report more entries than this list's capacity.
    pub fn read_overflow(&self, body: &[u8]) -> Result<usize, WireError> {
        let header = ListHeader::decode(body)?;
        let sent = self.request().limit;

        if header.limit != sent {
            return Err(WireError::LimitMismatch {
                sent,
                echoed: header.limit,
            });
        }

        if !header.is_overflow() {
            return Err(WireError::CountOutOfRange {
                count: header.count,
                limit: header.limit,
            });
        }

        usize::try_from(header.count).map_err(|_| WireError::CountOutOfRange {
            count: header.count,
            limit: header.limit,
        })
    }

    /// Entries of the last complete reply, in scan order.
    pub fn entries(&self) -> impl Iterator<Item = TaskEntry> + '_ {
        self.region
            .get(..self.count * ENTRY_SIZE)
            .unwrap_or_default()
            .chunks_exact(ENTRY_SIZE)
            .map(decode_entry)
    }
}

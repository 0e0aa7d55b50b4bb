//! Protocol versioning for safe upgrades.
//!
//! Every block that crosses an endpoint starts with an 8-byte stamp:
//! a magic word followed by the major and minor layout version. A peer
//! built against a different layout is rejected before any entry is read.

use bytes::{Buf, BufMut};
use std::fmt;

use crate::wire::WireError;

/// Magic word: the bytes `E R K 0x01` read as a little-endian u32.
pub const MAGIC: u32 = 0x014B_5245;

/// Size of the encoded stamp in bytes.
pub const STAMP_SIZE: usize = 8;

/// Layout version for the process-list block.
///
/// Uses semantic versioning: major.minor
/// - Major version bump: entry or header layout changed, incompatible
/// - Minor version bump: additive changes, backward compatible
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl ProtocolVersion {
    /// Current protocol version.
    pub const CURRENT: ProtocolVersion = ProtocolVersion { major: 1, minor: 0 };

    /// Creates a new ProtocolVersion.
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Returns true if this version is compatible with another.
    ///
    /// Compatibility rules:
    /// - Major versions must match
    /// - Any minor version is compatible within the same major version
    pub fn is_compatible_with(&self, other: &ProtocolVersion) -> bool {
        self.major == other.major
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Magic plus version, as it appears at the front of every block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionStamp {
    pub magic: u32,
    pub version: ProtocolVersion,
}

impl VersionStamp {
    /// The stamp this build writes.
    pub const CURRENT: VersionStamp = VersionStamp {
        magic: MAGIC,
        version: ProtocolVersion::CURRENT,
    };

    pub fn encode(&self, out: &mut impl BufMut) {
        out.put_u32_le(self.magic);
        out.put_u16_le(self.version.major);
        out.put_u16_le(self.version.minor);
    }

    /// Reads a stamp without validating it.
    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < STAMP_SIZE {
            return Err(WireError::Truncated {
                expected: STAMP_SIZE,
                actual: buf.len(),
            });
        }

        let magic = buf.get_u32_le();
        let major = buf.get_u16_le();
        let minor = buf.get_u16_le();

        Ok(Self {
            magic,
            version: ProtocolVersion::new(major, minor),
        })
    }

    /// Reads a stamp and checks it against this build's layout.
    ///
    /// # Errors
    ///
    /// - `WireError::BadMagic` if the block was not written by an Erebus peer
    /// - `WireError::VersionMismatch` if the major version differs
    pub fn decode_checked(buf: &[u8]) -> Result<Self, WireError> {
        let stamp = Self::decode(buf)?;

        if stamp.magic != MAGIC {
            return Err(WireError::BadMagic { found: stamp.magic });
        }

        if !stamp.version.is_compatible_with(&ProtocolVersion::CURRENT) {
            return Err(WireError::VersionMismatch {
                local: ProtocolVersion::CURRENT,
                remote: stamp.version,
            });
        }

        Ok(stamp)
    }
}

//! Erebus Protocol - Wire format for snapshot endpoint communication
//!
//! This crate provides the packed process-list layout shared verbatim by
//! the daemon and its clients, the version stamp that guards it, and the
//! opcode/status framing that carries open, close and snapshot calls,
//! along with the endpoint naming both sides agree on.

pub mod endpoint;
pub mod message;
pub mod version;
pub mod wire;

pub use endpoint::{device_path, root_dir_from_env, DEFAULT_ROOT_DIR, ROOT_DIR_ENV};
pub use message::{frame_codec, Frame, FrameError, OpenRequest, Opcode, Status, MAX_FRAME_SIZE};
pub use version::{ProtocolVersion, VersionStamp, MAGIC, STAMP_SIZE};
pub use wire::{
    encode_list, limit_in_range, ListHeader, ProcessList, WireError, ENTRY_SIZE, HEADER_SIZE, MAX_LIST_SIZE,
};

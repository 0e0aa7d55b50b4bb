//! Endpoint naming shared by the daemon and its clients.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Environment variable naming the root endpoints live under.
pub const ROOT_DIR_ENV: &str = "EREBUS_ROOT_DIR";

/// Root used when `EREBUS_ROOT_DIR` is unset or empty.
pub const DEFAULT_ROOT_DIR: &str = "/";

/// Path of the endpoint for `devno` under `root`.
pub fn device_path(root: &Path, devno: u32) -> PathBuf {
    root.join("dev").join(format!("erebus{devno}"))
}

/// The root directory from `EREBUS_ROOT_DIR`, or `/`.
pub fn root_dir_from_env() -> PathBuf {
    root_dir_from(std::env::var_os(ROOT_DIR_ENV))
}

fn root_dir_from(value: Option<OsString>) -> PathBuf {
    match value {
        Some(root) if !root.is_empty() => PathBuf::from(root),
        _ => PathBuf::from(DEFAULT_ROOT_DIR),
    }
}

//! Daemon configuration.
//!
//! Values come from three layers, later ones winning:
//!
//! 1. Built-in defaults
//! 2. A TOML file (`--config`, or `<state_dir>/erebus/erebusd.toml` if it exists)
//! 3. `EREBUS_ROOT_DIR`, `EREBUS_DEVICES` and `EREBUS_VERBOSE`

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use erebus_core::table::DEFAULT_PROC_ROOT;
use erebus_protocol::DEFAULT_ROOT_DIR;

pub use erebus_protocol::ROOT_DIR_ENV;

/// Environment variable overriding `devices`.
pub const DEVICES_ENV: &str = "EREBUS_DEVICES";

/// Environment variable overriding `verbose`.
pub const VERBOSE_ENV: &str = "EREBUS_VERBOSE";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Root that endpoints are created under (`<root>/dev/erebusN`)
    pub root_dir: PathBuf,

    /// Number of endpoints to create
    pub devices: u32,

    /// Let any local user connect (endpoint mode 0666 instead of 0600)
    pub permissive: bool,

    /// Log every request at debug level
    pub verbose: bool,

    /// Mount point of the proc filesystem the table is read from
    pub proc_root: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from(DEFAULT_ROOT_DIR),
            devices: 1,
            permissive: false,
            verbose: false,
            proc_root: PathBuf::from(DEFAULT_PROC_ROOT),
        }
    }
}

impl DaemonConfig {
    /// Loads the configuration from `path`, or from the default location
    /// if `path` is `None`, then applies environment overrides.
    ///
    /// A missing default file is not an error; a missing explicit one is.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides from `lookup`, which maps a variable name to its
    /// value.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(root) = lookup(ROOT_DIR_ENV) {
            if !root.is_empty() {
                self.root_dir = PathBuf::from(root);
            }
        }

        if let Some(devices) = lookup(DEVICES_ENV) {
            self.devices = devices.trim().parse().map_err(|_| ConfigError::Invalid {
                field: "devices",
                reason: format!("{DEVICES_ENV}={devices:?} is not a number"),
            })?;
        }

        if let Some(verbose) = lookup(VERBOSE_ENV) {
            self.verbose = matches!(verbose.trim(), "1" | "true" | "yes" | "on");
        }

        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.devices == 0 {
            return Err(ConfigError::Invalid {
                field: "devices",
                reason: "at least one endpoint is required".to_string(),
            });
        }
        Ok(())
    }
}

/// `<state_dir>/erebus/erebusd.toml`, if the platform has a state directory.
pub fn default_path() -> Option<PathBuf> {
    dirs::state_dir().map(|base| StatePaths::under(base).config_file())
}

/// Files the daemon keeps in `<base>/erebus`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    dir: PathBuf,
}

impl StatePaths {
    /// Uses the platform state directory, or the temp directory without one.
    pub fn discover() -> Self {
        Self::under(dirs::state_dir().unwrap_or_else(std::env::temp_dir))
    }

    pub fn under(base: impl AsRef<Path>) -> Self {
        Self {
            dir: base.as_ref().join("erebus"),
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.dir.join("erebusd.toml")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.dir.join("erebusd.pid")
    }

    pub fn log_file(&self) -> PathBuf {
        self.dir.join("erebusd.log")
    }

    /// Creates the state directory if needed.
    pub fn ensure_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir)
    }

    /// PID recorded by a running daemon, if any.
    pub fn read_pid(&self) -> Option<u32> {
        fs::read_to_string(self.pid_file()).ok()?.trim().parse().ok()
    }

    pub fn write_pid(&self, pid: u32) -> io::Result<()> {
        self.ensure_dir()?;
        fs::write(self.pid_file(), pid.to_string())
    }

    pub fn remove_pid(&self) {
        let _ = fs::remove_file(self.pid_file());
    }
}

/// Errors loading the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.root_dir, PathBuf::from("/"));
        assert_eq!(config.devices, 1);
        assert!(!config.permissive);
        assert!(!config.verbose);
        assert_eq!(config.proc_root, PathBuf::from("/proc"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = DaemonConfig::from_toml_str("devices = 4\npermissive = true\n").unwrap();
        assert_eq!(config.devices, 4);
        assert!(config.permissive);
        assert_eq!(config.root_dir, PathBuf::from("/"));
    }

    #[test]
    fn test_zero_devices_rejected() {
        let err = DaemonConfig::from_toml_str("devices = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "devices", .. }));
    }

    #[test]
    fn test_bad_toml_rejected() {
        assert!(matches!(
            DaemonConfig::from_toml_str("devices = \"many\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = DaemonConfig::default();
        config
            .apply_env(env(&[
                (ROOT_DIR_ENV, "/srv/jail"),
                (DEVICES_ENV, "2"),
                (VERBOSE_ENV, "1"),
            ]))
            .unwrap();

        assert_eq!(config.root_dir, PathBuf::from("/srv/jail"));
        assert_eq!(config.devices, 2);
        assert!(config.verbose);
    }

    #[test]
    fn test_empty_root_env_ignored() {
        let mut config = DaemonConfig::default();
        config.apply_env(env(&[(ROOT_DIR_ENV, "")])).unwrap();
        assert_eq!(config.root_dir, PathBuf::from("/"));
    }

    #[test]
    fn test_bad_devices_env_rejected() {
        let mut config = DaemonConfig::default();
        assert!(config.apply_env(env(&[(DEVICES_ENV, "two")])).is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("erebusd.toml");
        std::fs::write(&path, "verbose = true\nproc_root = \"/host/proc\"\n").unwrap();

        let config = DaemonConfig::from_file(&path).unwrap();
        assert!(config.verbose);
        assert_eq!(config.proc_root, PathBuf::from("/host/proc"));
    }

    #[test]
    fn test_state_paths_share_one_dir() {
        let paths = StatePaths::under("/var/state");
        assert_eq!(paths.config_file(), PathBuf::from("/var/state/erebus/erebusd.toml"));
        assert_eq!(paths.pid_file(), PathBuf::from("/var/state/erebus/erebusd.pid"));
        assert_eq!(paths.log_file(), PathBuf::from("/var/state/erebus/erebusd.log"));
    }

    #[test]
    fn test_pid_file_lifecycle() {
        let temp_dir = tempfile::tempdir().unwrap();
        let paths = StatePaths::under(temp_dir.path());
        assert_eq!(paths.read_pid(), None);

        paths.write_pid(4242).unwrap();
        assert_eq!(paths.read_pid(), Some(4242));

        paths.remove_pid();
        assert_eq!(paths.read_pid(), None);
    }

    #[test]
    fn test_garbage_pid_file_ignored() {
        let temp_dir = tempfile::tempdir().unwrap();
        let paths = StatePaths::under(temp_dir.path());
        paths.ensure_dir().unwrap();
        fs::write(paths.pid_file(), "not a pid").unwrap();
        assert_eq!(paths.read_pid(), None);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let err = DaemonConfig::from_file(Path::new("/nonexistent/erebusd.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}

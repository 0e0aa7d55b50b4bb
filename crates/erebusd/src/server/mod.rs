//! Unix socket endpoints for the erebus daemon.
//!
//! The server:
//! - Binds one endpoint per device number at `<root>/dev/erebus<devno>`
//! - Spawns a ConnectionHandler for each client
//! - Removes its endpoints on shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  DeviceServer   │
//! │                 │
//! │ UnixListener xN │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ConnectionHandler│────▶│ ServiceInstance │
//! │   (per client)  │     │ (shared by all) │
//! └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Accept errors are logged and the endpoint keeps serving

mod connection;

pub use connection::{ConnectionError, ConnectionHandler};

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::service::ServiceInstance;

/// Endpoint mode when permission checks are enforced.
pub const RESTRICTED_MODE: u32 = 0o600;

/// Endpoint mode when any local user may connect.
pub const PERMISSIVE_MODE: u32 = 0o666;

pub use erebus_protocol::device_path;

/// The daemon's endpoints.
pub struct DeviceServer {
    /// Root that `dev/erebusN` is resolved against
    root_dir: PathBuf,

    /// Number of endpoints, numbered from zero
    devices: u32,

    /// Whether any local user may connect
    permissive: bool,

    /// Shared registry, table and dispatch
    service: Arc<ServiceInstance>,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Connection counter shared by every endpoint
    connection_counter: Arc<AtomicU64>,
}

impl DeviceServer {
    /// Creates a new server.
    ///
    /// # Arguments
    ///
    /// * `root_dir` - Root directory endpoints are created under
    /// * `devices` - Number of endpoints to bind
    /// * `service` - The service all endpoints share
    /// * `cancel_token` - Token for graceful shutdown
    pub fn new(
        root_dir: impl Into<PathBuf>,
        devices: u32,
        service: Arc<ServiceInstance>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            root_dir: root_dir.into(),
            devices,
            permissive: false,
            service,
            cancel_token,
            connection_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Lets any local user connect instead of the daemon's user only.
    pub fn permissive(mut self, permissive: bool) -> Self {
        self.permissive = permissive;
        self
    }

    /// Paths of every endpoint this server binds.
    pub fn endpoints(&self) -> Vec<PathBuf> {
        (0..self.devices)
            .map(|devno| device_path(&self.root_dir, devno))
            .collect()
    }

    /// Runs the server.
    ///
    /// Binds every endpoint, then serves until the cancellation token is
    /// triggered. Does not return until shutdown; endpoints are removed
    /// before it does.
    pub async fn run(&self) -> Result<(), ServerError> {
        let mut listeners = Vec::new();
        for devno in 0..self.devices {
            match self.bind(devno) {
                Ok(listener) => listeners.push((devno, listener)),
                Err(e) => {
                    self.cleanup();
                    return Err(e);
                }
            }
        }

        let mut tasks = Vec::with_capacity(listeners.len());
        for (devno, listener) in listeners {
            tasks.push(tokio::spawn(accept_loop(
                listener,
                devno,
                Arc::clone(&self.service),
                self.cancel_token.clone(),
                Arc::clone(&self.connection_counter),
            )));
        }

        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                error!(error = %e, "Endpoint task failed");
            }
        }

        self.cleanup();
        Ok(())
    }

    /// Prepares and binds the endpoint for `devno`.
    fn bind(&self, devno: u32) -> Result<UnixListener, ServerError> {
        let path = device_path(&self.root_dir, devno);
        let setup_err = |e: std::io::Error| ServerError::SocketSetup {
            path: path.clone(),
            error: e.to_string(),
        };

        // Remove stale endpoint left by a previous run
        if path.exists() {
            std::fs::remove_file(&path).map_err(setup_err)?;
        }

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(setup_err)?;
            }
        }

        let listener = UnixListener::bind(&path).map_err(setup_err)?;

        let mode = if self.permissive {
            PERMISSIVE_MODE
        } else {
            RESTRICTED_MODE
        };
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(setup_err)?;

        info!(
            endpoint = %path.display(),
            devno,
            mode = %format!("{mode:o}"),
            "Endpoint listening"
        );
        Ok(listener)
    }

    /// Removes every endpoint file.
    fn cleanup(&self) {
        for path in self.endpoints() {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!(
                        endpoint = %path.display(),
                        error = %e,
                        "Failed to remove endpoint"
                    );
                }
            }
        }

        info!(sessions = self.service.registry().len(), "Server cleanup complete");
    }
}

/// Accepts connections on one endpoint until cancelled.
async fn accept_loop(
    listener: UnixListener,
    devno: u32,
    service: Arc<ServiceInstance>,
    cancel_token: CancellationToken,
    counter: Arc<AtomicU64>,
) {
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!(devno, "Endpoint shutting down");
                break;
            }

            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let connection_number = counter.fetch_add(1, Ordering::Relaxed);
                        let service = Arc::clone(&service);
                        let cancel_token = cancel_token.clone();

                        tokio::spawn(async move {
                            match ConnectionHandler::new(stream, service, devno, connection_number) {
                                Ok(handler) => handler.run(cancel_token).await,
                                Err(e) => {
                                    warn!(
                                        connection = connection_number,
                                        error = %e,
                                        "Rejected connection"
                                    );
                                }
                            }
                        });
                    }
                    Err(e) => {
                        error!(devno, error = %e, "Failed to accept connection");
                    }
                }
            }
        }
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to setup endpoint at {path}: {error}")]
    SocketSetup { path: PathBuf, error: String },
}

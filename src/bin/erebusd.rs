//! Erebus Daemon - Thread-table snapshot endpoints
//!
//! This binary runs the privileged side of the snapshot service: it owns
//! the session registry and answers snapshot requests on
//! `<root>/dev/erebus<devno>`.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! erebusd start
//!
//! # Start the daemon (background/daemonized)
//! erebusd start -d
//!
//! # Stop the daemon
//! erebusd stop
//!
//! # Check daemon status
//! erebusd status
//! ```

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use erebus_core::ProcfsTable;
use erebusd::config::{DaemonConfig, StatePaths};
use erebusd::server::DeviceServer;
use erebusd::service::ServiceInstance;

const STOP_TIMEOUT: Duration = Duration::from_secs(5);
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Erebus daemon - thread-table snapshot service
#[derive(Parser, Debug)]
#[command(name = "erebusd", version, about)]
struct Args {
    /// Configuration file (default: <state_dir>/erebus/erebusd.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
}

/// PID of a live daemon recorded in the state directory.
///
/// A stale PID file left by a crashed daemon is removed.
fn running_daemon(paths: &StatePaths) -> Option<u32> {
    let pid = paths.read_pid()?;
    if process_alive(pid) {
        Some(pid)
    } else {
        paths.remove_pid();
        None
    }
}

fn process_alive(pid: u32) -> bool {
    // 0 would probe our own process group
    let Ok(pid @ 1..) = i32::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 only probes for existence
    let result = unsafe { libc::kill(pid, 0) };
    result == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

fn signal_terminate(pid: u32) -> Result<()> {
    let raw = i32::try_from(pid).context("PID out of range")?;
    // SAFETY: kill has no memory-safety preconditions
    if unsafe { libc::kill(raw, libc::SIGTERM) } != 0 {
        bail!("Failed to send SIGTERM to process {pid}: {}", io::Error::last_os_error());
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = DaemonConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let paths = StatePaths::discover();

    match args.command.unwrap_or(Command::Start { daemon: false }) {
        Command::Start { daemon } => {
            if let Some(pid) = running_daemon(&paths) {
                eprintln!("Daemon is already running (PID {pid})");
                eprintln!("Use 'erebusd stop' to stop it first.");
                process::exit(1);
            }

            if daemon {
                detach(&paths)?;
            }

            paths
                .write_pid(process::id())
                .with_context(|| format!("Failed to write {}", paths.pid_file().display()))?;
            let result = run_daemon(config);
            paths.remove_pid();
            result
        }
        Command::Stop => {
            let Some(pid) = running_daemon(&paths) else {
                println!("Daemon is not running.");
                return Ok(());
            };

            println!("Stopping daemon (PID {pid})...");
            signal_terminate(pid)?;

            let deadline = Instant::now() + STOP_TIMEOUT;
            while Instant::now() < deadline {
                if !process_alive(pid) {
                    println!("Daemon stopped.");
                    return Ok(());
                }
                thread::sleep(STOP_POLL_INTERVAL);
            }

            eprintln!("Daemon did not stop within {}s.", STOP_TIMEOUT.as_secs());
            process::exit(1);
        }
        Command::Status => match running_daemon(&paths) {
            Some(pid) => {
                println!("Daemon is running (PID {pid})");
                print_endpoints(&config.root_dir, config.devices);
                Ok(())
            }
            None => {
                println!("Daemon is not running.");
                process::exit(1);
            }
        },
    }
}

fn print_endpoints(root: &Path, devices: u32) {
    for devno in 0..devices {
        let path = erebus_protocol::device_path(root, devno);
        if path.exists() {
            println!("Endpoint: {}", path.display());
        }
    }
}

/// Forks into the background with stdout and stderr sent to the log file.
fn detach(paths: &StatePaths) -> Result<()> {
    paths.ensure_dir().context("Failed to create state directory")?;

    let log_path = paths.log_file();
    let log = File::create(&log_path)
        .with_context(|| format!("Failed to create {}", log_path.display()))?;
    let log_err = log.try_clone().context("Failed to duplicate log handle")?;

    daemonize::Daemonize::new()
        .working_directory("/")
        .stdout(log)
        .stderr(log_err)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}

fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("erebusd={level}").parse()?)
                .add_directive(format!("erebus_core={level}").parse()?)
                .add_directive(format!("erebus_protocol={level}").parse()?),
        )
        .init();
    Ok(())
}

#[tokio::main]
async fn run_daemon(config: DaemonConfig) -> Result<()> {
    init_logging(config.verbose)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        root = %config.root_dir.display(),
        devices = config.devices,
        permissive = config.permissive,
        "Erebus daemon starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let table = Arc::new(ProcfsTable::with_root(&config.proc_root));
    let service = Arc::new(ServiceInstance::new(table));
    info!(proc_root = %config.proc_root.display(), "Service instance ready");

    let server = DeviceServer::new(&config.root_dir, config.devices, service, cancel_token)
        .permissive(config.permissive);

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Erebus daemon stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }

    Ok(())
}

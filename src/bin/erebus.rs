//! Erebus - Print per-thread CPU times from the snapshot service
//!
//! # Usage
//!
//! ```text
//! erebus                 # one line per thread: "<pid> u=<user> k=<kernel>"
//! erebus --json          # one JSON object per thread
//! erebus --devno 1       # use /dev/erebus1
//! ```
//!
//! Logs go to stderr so stdout stays the listing.

use std::io::{self, BufWriter, Write};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use erebus_client::{DriverConfig, ErebusDriver};

/// Erebus - snapshot the thread table
#[derive(Parser, Debug)]
#[command(name = "erebus", version, about)]
struct Args {
    /// Endpoint number
    #[arg(short, long, default_value_t = 0)]
    devno: u32,

    /// Print JSON lines instead of text
    #[arg(long)]
    json: bool,

    /// Task list capacity to start from
    #[arg(long)]
    initial_capacity: Option<usize>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("erebus_client=warn".parse()?)
                .add_directive("erebus_protocol=warn".parse()?),
        )
        .init();

    let mut config = DriverConfig {
        devno: args.devno,
        ..Default::default()
    };
    if let Some(capacity) = args.initial_capacity {
        config.initial_capacity = capacity;
    }

    let endpoint = config.device_path();
    let driver = ErebusDriver::connect(&config)
        .await
        .with_context(|| format!("Failed to open {}", endpoint.display()))?;
    debug!(
        endpoint = %driver.device().path().display(),
        server_version = %driver.device().server_version(),
        "Connected"
    );

    let mut out = BufWriter::new(io::stdout());
    let mut write_error = None;

    let total = driver
        .enumerate_tasks(|task| {
            let written = if args.json {
                serde_json::to_string(&task)
                    .map_err(io::Error::from)
                    .and_then(|line| writeln!(out, "{line}"))
            } else {
                writeln!(out, "{task}")
            };
            match written {
                Ok(()) => true,
                Err(e) => {
                    write_error = Some(e);
                    false
                }
            }
        })
        .await
        .context("Failed to snapshot the thread table")?;

    if let Some(e) = write_error {
        return Err(e).context("Failed to write listing");
    }
    out.flush().context("Failed to write listing")?;
    debug!(total, "Listed threads");

    driver.close().await.context("Failed to close session")?;
    Ok(())
}

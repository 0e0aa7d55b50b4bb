//! Erebus Client - Growing-buffer access to the snapshot service
//!
//! This crate provides the unprivileged side of the snapshot service:
//! - `device` - One open session on an endpoint
//! - `driver` - The reusable, growing task list and its retry loop
//! - `config` - Endpoint selection and growth tuning
//! - `error` - Client error types
//!
//! # Example
//!
//! ```rust,ignore
//! use erebus_client::{DriverConfig, ErebusDriver};
//!
//! let driver = ErebusDriver::connect(&DriverConfig::default()).await?;
//! driver
//!     .enumerate_tasks(|task| {
//!         println!("{task}");
//!         true
//!     })
//!     .await?;
//! driver.close().await?;
//! ```
//!
//! # Panic-Free Guarantees
//!
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()` or `todo!()`
//! outside tests. Every failure is a `DriverError`.

pub mod config;
pub mod device;
pub mod driver;
pub mod error;

pub use config::DriverConfig;
pub use device::{Device, Fetch, SocketDevice};
pub use driver::ErebusDriver;
pub use error::{DriverError, Result};

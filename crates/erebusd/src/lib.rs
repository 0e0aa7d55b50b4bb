//! Erebus Daemon - Session registry and snapshot endpoints
//!
//! This crate provides the privileged side of the snapshot service:
//! - `registry` - Session registry, at most one open session per identity
//! - `snapshot` - Thread table enumeration into a caller-sized list
//! - `service` - The service instance shared by every endpoint and session
//! - `server` - Unix socket endpoints, one per device number
//! - `config` - Daemon configuration
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       erebusd daemon                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │  DeviceServer   │────▶│      ServiceInstance        │   │
//! │  │ dev/erebus0..N  │     │  SessionRegistry + table    │   │
//! │  └────────┬────────┘     └──────────────┬──────────────┘   │
//! │           │                             │                   │
//! │           │ connections                 │ spawn_blocking    │
//! │           ▼                             ▼                   │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │ConnectionHandler│     │   snapshot::enumerate       │   │
//! │  │  (per client)   │     │   (one walk per request)    │   │
//! │  └─────────────────┘     └─────────────────────────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Poisoned locks are recovered, never propagated as panics

pub mod config;
pub mod registry;
pub mod server;
pub mod service;
pub mod snapshot;

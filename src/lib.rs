//! Storage service bootstrap
//!
//! Waits for the database (and optionally the stream engine and control
//! plane) before serving, applies the storage schema, and keeps the TLS
//! credentials of both the HTTPS listener and the database client fresh
//! while the process runs.

pub mod bootstrap;
pub mod cli;
pub mod db;
pub mod error;
pub mod health;
pub mod metrics;
pub mod options;
pub mod readiness;
pub mod server;
pub mod shutdown;
pub mod telemetry;
pub mod tls;

pub use error::{Error, ErrorKind, Result};

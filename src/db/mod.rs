//! Database access
//!
//! The service only talks to PostgreSQL over verified TLS. This module owns
//! the connection factory and the schema bootstrap; query logic for stored
//! resources lives in the API layer that receives the pool.
//!
//! # Module Organization
//!
//! - `pool` - connection URI policy and pooled client construction
//! - `migrations` - idempotent schema definitions and the runner

pub mod migrations;
pub mod pool;

pub use migrations::{DEFINITIONS, Migration, apply_all};
pub use pool::{PgClient, PgConnector, PgManager, PgPool, acquire, connect_config};

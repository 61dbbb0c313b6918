//! PostgreSQL connector and utilities
//!
//! Connections are opened through a single-connection sqlx pool so that a
//! `PgListener` can own the only connection and run queries on it.

mod config;
mod connector;
mod health;

pub use config::PostgresConfig;
pub use connector::connect_from_config;
pub use health::{HEALTH_CHECK_QUERY, check_health};

// Re-export sqlx types for convenience
pub use sqlx::postgres::{PgConnectOptions, PgListener, PgPool};

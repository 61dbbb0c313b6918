use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

use super::PostgresConfig;
use crate::common::DatabaseError;

/// Open a single-connection pool described by `config`.
///
/// The pool eagerly opens its connection, so a returned pool has already
/// completed the startup handshake. Idle and lifetime reaping are disabled:
/// the connection lives until the caller closes the pool.
pub async fn connect_from_config(config: &PostgresConfig) -> Result<PgPool, DatabaseError> {
    let options = config.connect_options()?;

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .min_connections(0)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    info!(
        application_name = %config.application_name,
        "Connected to PostgreSQL"
    );

    Ok(pool)
}

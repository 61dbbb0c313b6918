use sqlx::{Executor, Postgres};
use tracing::debug;

use crate::common::DatabaseError;

/// Trivial round-trip used to detect dead connections
pub const HEALTH_CHECK_QUERY: &str = "SELECT 1";

/// Check PostgreSQL health on any executor (pool, connection, listener).
///
/// Runs [`HEALTH_CHECK_QUERY`]; the statement is persistent so a connection
/// that prepared it up front reuses the cached plan.
pub async fn check_health<'c, E>(executor: E) -> Result<(), DatabaseError>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(HEALTH_CHECK_QUERY)
        .execute(executor)
        .await
        .map_err(|e| DatabaseError::HealthCheckFailed(format!("PostgreSQL health check failed: {e}")))?;

    debug!("PostgreSQL health check passed");
    Ok(())
}

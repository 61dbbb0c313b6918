use batch_collector::CollectorConfig;
use core_config::{ConfigError, FromEnv, env_optional, env_or_default, env_required};
use database::postgres::PostgresConfig;
use std::net::SocketAddr;

use crate::signing::SigningKey;

/// Everything the token collector reads at startup
#[derive(Debug, Clone)]
pub struct TokenCollectorConfig {
    pub database: PostgresConfig,
    pub collector: CollectorConfig,
    pub signing_key: SigningKey,
    /// LISTEN channel the insert trigger notifies
    pub channel: String,
    /// Cursor row advanced by the dequeue function
    pub queue: String,
    /// Prometheus exporter address, disabled when unset
    pub metrics_addr: Option<SocketAddr>,
}

/// Load TokenCollectorConfig from environment variables
///
/// - `DATABASE_URL` and the other `DB_*` variables, see [`PostgresConfig`]
/// - `COLLECTOR_*` batching variables, see [`CollectorConfig`]
/// - `COLLECTOR_SIGNING_KEY` (required, 64 hex chars)
/// - `COLLECTOR_CHANNEL` (optional, default: token_insert)
/// - `COLLECTOR_QUEUE` (optional, default: tokens)
/// - `COLLECTOR_METRICS_ADDR` (optional, e.g. 0.0.0.0:9090)
impl FromEnv for TokenCollectorConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let database = PostgresConfig::from_env()?;
        let collector = CollectorConfig::from_env()?.with_reconnect(database.retry_config());

        let signing_key = SigningKey::from_hex(&env_required("COLLECTOR_SIGNING_KEY")?)
            .map_err(|e| ConfigError::parse("COLLECTOR_SIGNING_KEY", e))?;

        let channel = env_or_default("COLLECTOR_CHANNEL", "token_insert");
        if channel.trim().is_empty() {
            return Err(ConfigError::parse("COLLECTOR_CHANNEL", "must not be empty"));
        }
        let queue = env_or_default("COLLECTOR_QUEUE", "tokens");
        if queue.trim().is_empty() {
            return Err(ConfigError::parse("COLLECTOR_QUEUE", "must not be empty"));
        }

        let metrics_addr = env_optional("COLLECTOR_METRICS_ADDR")
            .map(|addr| addr.trim().parse::<SocketAddr>())
            .transpose()
            .map_err(|e| ConfigError::parse("COLLECTOR_METRICS_ADDR", e))?;

        Ok(Self {
            database,
            collector,
            signing_key,
            channel,
            queue,
            metrics_addr,
        })
    }
}

//! Collector configuration
//!
//! `CollectorConfig` holds the two batching knobs (row limit and time window),
//! the idle health-check interval and the reconnect policy.

use core_config::{ConfigError, FromEnv, env_parse};
use database::RetryConfig;
use std::time::Duration;

/// Configuration for the batch collector
#[derive(Debug, Clone, PartialEq)]
pub struct CollectorConfig {
    /// Pending-notification count that triggers a dequeue immediately,
    /// and the maximum number of rows fetched per round trip
    pub batch_limit: usize,

    /// Time after the first pending notification at which a partial batch is dequeued
    pub batch_timeout: Duration,

    /// Minimum idle time between two health checks
    pub healthcheck_interval: Duration,

    /// Pause between consecutive chunks of one dequeue
    pub chunk_pause: Duration,

    /// Backoff used when re-establishing a lost connection
    pub reconnect: RetryConfig,
}

impl CollectorConfig {
    /// Create a config with explicit batching knobs and default everything else
    pub fn new(batch_limit: usize, batch_timeout: Duration) -> Self {
        Self {
            batch_limit: batch_limit.max(1),
            batch_timeout,
            ..Self::default()
        }
    }

    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit.max(1);
        self
    }

    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    pub fn with_healthcheck_interval(mut self, interval: Duration) -> Self {
        self.healthcheck_interval = interval;
        self
    }

    pub fn with_chunk_pause(mut self, pause: Duration) -> Self {
        self.chunk_pause = pause;
        self
    }

    pub fn with_reconnect(mut self, reconnect: RetryConfig) -> Self {
        self.reconnect = reconnect;
        self
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            batch_limit: 100,
            batch_timeout: Duration::from_millis(5000),
            healthcheck_interval: Duration::from_millis(30_000),
            chunk_pause: Duration::from_millis(10),
            reconnect: RetryConfig::default(),
        }
    }
}

/// Parse a strictly positive integer
fn positive(key: &str, default: &str) -> Result<u64, ConfigError> {
    let value: u64 = env_parse(key, default)?;
    if value == 0 {
        return Err(ConfigError::parse(key, "must be greater than zero"));
    }
    Ok(value)
}

/// Load CollectorConfig from environment variables
///
/// - `COLLECTOR_BATCH_LIMIT` (optional, default: 100)
/// - `COLLECTOR_BATCH_TIMEOUT_MS` (optional, default: 5000)
/// - `COLLECTOR_HEALTHCHECK_INTERVAL_MS` (optional, default: 30000)
/// - `COLLECTOR_CHUNK_PAUSE_MS` (optional, default: 10)
///
/// The reconnect policy keeps its default; callers usually replace it with the
/// one derived from the database configuration.
impl FromEnv for CollectorConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let batch_limit = positive("COLLECTOR_BATCH_LIMIT", "100")?;
        let batch_limit = usize::try_from(batch_limit)
            .map_err(|e| ConfigError::parse("COLLECTOR_BATCH_LIMIT", e))?;

        Ok(Self {
            batch_limit,
            batch_timeout: Duration::from_millis(positive("COLLECTOR_BATCH_TIMEOUT_MS", "5000")?),
            healthcheck_interval: Duration::from_millis(positive(
                "COLLECTOR_HEALTHCHECK_INTERVAL_MS",
                "30000",
            )?),
            chunk_pause: Duration::from_millis(env_parse("COLLECTOR_CHUNK_PAUSE_MS", "10")?),
            reconnect: RetryConfig::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_pattern() {
        let config = CollectorConfig::new(3, Duration::from_secs(5))
            .with_healthcheck_interval(Duration::from_secs(60))
            .with_chunk_pause(Duration::ZERO)
            .with_reconnect(RetryConfig::new().with_max_retries(1));

        assert_eq!(config.batch_limit, 3);
        assert_eq!(config.batch_timeout, Duration::from_secs(5));
        assert_eq!(config.healthcheck_interval, Duration::from_secs(60));
        assert_eq!(config.chunk_pause, Duration::ZERO);
        assert_eq!(config.reconnect.max_retries, 1);
    }

    #[test]
    fn test_zero_limit_is_clamped() {
        assert_eq!(CollectorConfig::default().with_batch_limit(0).batch_limit, 1);
    }

    #[test]
    fn test_from_env_defaults() {
        temp_env::with_vars_unset(
            [
                "COLLECTOR_BATCH_LIMIT",
                "COLLECTOR_BATCH_TIMEOUT_MS",
                "COLLECTOR_HEALTHCHECK_INTERVAL_MS",
                "COLLECTOR_CHUNK_PAUSE_MS",
            ],
            || {
                let config = CollectorConfig::from_env().unwrap();
                assert_eq!(config, CollectorConfig::default());
            },
        );
    }

    #[test]
    fn test_from_env_custom() {
        temp_env::with_vars(
            [
                ("COLLECTOR_BATCH_LIMIT", Some("3")),
                ("COLLECTOR_BATCH_TIMEOUT_MS", Some("5000")),
                ("COLLECTOR_HEALTHCHECK_INTERVAL_MS", Some("1000")),
                ("COLLECTOR_CHUNK_PAUSE_MS", Some("0")),
            ],
            || {
                let config = CollectorConfig::from_env().unwrap();
                assert_eq!(config.batch_limit, 3);
                assert_eq!(config.batch_timeout, Duration::from_millis(5000));
                assert_eq!(config.healthcheck_interval, Duration::from_millis(1000));
                assert_eq!(config.chunk_pause, Duration::ZERO);
            },
        );
    }

    #[test]
    fn test_from_env_rejects_zero_limit() {
        temp_env::with_var("COLLECTOR_BATCH_LIMIT", Some("0"), || {
            let err = CollectorConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("COLLECTOR_BATCH_LIMIT"));
        });
    }

    #[test]
    fn test_from_env_rejects_malformed_timeout() {
        temp_env::with_var("COLLECTOR_BATCH_TIMEOUT_MS", Some("5s"), || {
            let err = CollectorConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("COLLECTOR_BATCH_TIMEOUT_MS"));
        });
    }
}

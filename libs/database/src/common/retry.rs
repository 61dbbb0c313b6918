use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry configuration for database connections
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,

    /// Delay before the first retry in milliseconds
    pub initial_delay_ms: u64,

    /// Upper bound for any single delay in milliseconds
    pub max_delay_ms: u64,

    /// Multiplier applied to the delay after every retry
    pub backoff_multiplier: f64,

    /// Scale every delay by a random factor in [0.5, 1.0)
    pub use_jitter: bool,
}

impl RetryConfig {
    /// Defaults: 3 retries, 100ms initial delay, 5s cap, x2 backoff, jitter on
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay_ms: u64) -> Self {
        self.initial_delay_ms = delay_ms;
        self
    }

    pub fn with_max_delay(mut self, delay_ms: u64) -> Self {
        self.max_delay_ms = delay_ms;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.use_jitter = false;
        self
    }

    /// Delay schedule for this configuration
    pub fn backoff(&self) -> Backoff {
        Backoff {
            next_delay_ms: self.initial_delay_ms,
            remaining: self.max_retries,
            config: self.clone(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

/// Finite sequence of delays between attempts.
///
/// Yields exactly `max_retries` delays; `None` means give up.
#[derive(Debug, Clone)]
pub struct Backoff {
    next_delay_ms: u64,
    remaining: u32,
    config: RetryConfig,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let base = self.next_delay_ms.min(self.config.max_delay_ms);
        self.next_delay_ms = ((self.next_delay_ms as f64 * self.config.backoff_multiplier)
            as u64)
            .min(self.config.max_delay_ms);

        let delay = if self.config.use_jitter {
            apply_jitter(base)
        } else {
            base
        };
        Some(Duration::from_millis(delay))
    }
}

/// Retry an async operation following the configured backoff schedule.
///
/// The operation receives the 1-based attempt number. The last error is
/// returned once the schedule is exhausted.
///
/// ```ignore
/// let config = RetryConfig::new().with_max_retries(5);
/// let pool = retry_with_backoff(|_| postgres::connect_from_config(&pg), config).await?;
/// ```
pub async fn retry_with_backoff<F, Fut, T, E>(mut operation: F, config: RetryConfig) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut schedule = config.backoff();
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(attempt, "Operation succeeded after retrying");
                }
                return Ok(result);
            }
            Err(e) => match schedule.next() {
                Some(delay) => {
                    debug!(
                        attempt,
                        max_attempts = config.max_retries + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => {
                    warn!(attempts = attempt, error = %e, "Operation failed, giving up");
                    return Err(e);
                }
            },
        }
    }
}

/// Scale `delay` by a pseudo-random factor between 50% and 100%
fn apply_jitter(delay: u64) -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::BuildHasher;

    let random_factor =
        (RandomState::new().hash_one(std::time::SystemTime::now()) % 50) as f64 / 100.0 + 0.5;

    (delay as f64 * random_factor) as u64
}

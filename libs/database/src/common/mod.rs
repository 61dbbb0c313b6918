//! Common utilities shared across database implementations

pub mod error;
pub mod retry;

pub use error::{DatabaseError, DatabaseResult};
pub use retry::{Backoff, RetryConfig, retry_with_backoff};

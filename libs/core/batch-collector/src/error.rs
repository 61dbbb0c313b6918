//! Collector error types and error categorization
//!
//! Every error carries a category deciding what the scheduler does with it:
//! - **Transient**: connection-level trouble, tear down and reconnect
//! - **Fatal**: nothing a retry can fix, stop the process

use thiserror::Error;

/// Category of error for deciding between reconnect and abort
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Reconnect, catch up, carry on
    Transient,
    /// Abort with a non-zero exit status
    Fatal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Fatal => "fatal",
        }
    }
}

/// Collector errors
#[derive(Error, Debug)]
pub enum CollectorError {
    /// Opening the connection, subscribing or preparing statements failed
    #[error("Connect failed: {0}")]
    Connect(String),

    /// I/O or protocol failure on an established connection
    #[error("Connection error: {0}")]
    Connection(String),

    /// The server closed the connection while we were waiting for input
    #[error("Connection lost while consuming input")]
    ConnectionLost,

    /// Health-check round trip failed
    #[error("Health check failed: {0}")]
    HealthCheck(String),

    /// Result rows no longer match the expected columns
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Writing a batch to the downstream consumer failed
    #[error("Emit failed: {0}")]
    Emit(#[from] std::io::Error),

    /// Reconnect attempts exhausted
    #[error("Reconnect failed after retries: {0}")]
    ReconnectExhausted(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CollectorError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            CollectorError::Connect(_) => ErrorCategory::Transient,
            CollectorError::Connection(_) => ErrorCategory::Transient,
            CollectorError::ConnectionLost => ErrorCategory::Transient,
            CollectorError::HealthCheck(_) => ErrorCategory::Transient,
            CollectorError::SchemaMismatch(_) => ErrorCategory::Fatal,
            // the cursor has already moved past the rows we failed to write
            CollectorError::Emit(_) => ErrorCategory::Fatal,
            CollectorError::ReconnectExhausted(_) => ErrorCategory::Fatal,
            CollectorError::Config(_) => ErrorCategory::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.category() == ErrorCategory::Fatal
    }
}

impl From<core_config::ConfigError> for CollectorError {
    fn from(err: core_config::ConfigError) -> Self {
        CollectorError::Config(err.to_string())
    }
}

//! Tokens Domain
//!
//! Account tokens (activation, password recovery) queued in PostgreSQL and
//! handed to the mailer as signed batch lines.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ PgQueueConnector │  ← LISTEN/NOTIFY + dequeue_tokens() on one connection
//! └────────┬─────────┘
//!          │ WorkItem
//! ┌────────▼─────────┐
//! │   TokenEncoder   │  ← HMAC-SHA256 over path tag ‖ secret [‖ code]
//! └────────┬─────────┘
//!          │ SignedPayload
//! ┌────────▼─────────┐
//! │  BatchCollector  │  ← one line per batch on stdout
//! └──────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use batch_collector::{BatchCollector, BatchEmitter};
//! use domain_tokens::{PgQueueConnector, TokenCollectorConfig, TokenEncoder};
//!
//! let config = TokenCollectorConfig::from_env()?;
//! let collector = BatchCollector::new(
//!     PgQueueConnector::from_config(&config),
//!     TokenEncoder::new(config.signing_key.clone()),
//!     BatchEmitter::stdout(),
//!     config.collector.clone(),
//! );
//! collector.run(shutdown_rx).await?;
//! ```

pub mod config;
pub mod encoder;
pub mod error;
pub mod models;
pub mod postgres;
pub mod signing;
pub mod wire;

// Re-export commonly used types
pub use config::TokenCollectorConfig;
pub use encoder::TokenEncoder;
pub use error::{TokenError, TokenResult};
pub use models::{ActionKind, SECRET_LEN, Secret, SignedPayload, WorkItem};
pub use postgres::{DEQUEUE_SQL, PgQueueConnection, PgQueueConnector};
pub use signing::{KEY_LEN, SigningKey};
pub use wire::parse_line;

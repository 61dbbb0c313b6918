//! Batch Collector
//!
//! A notification-driven batching collector for table-backed queues.
//!
//! ## Features
//!
//! - **Generic collector**: `BatchCollector<C, E, W>` works over any
//!   `QueueConnector` and any `RowEncoder`
//! - **Batch windows**: dequeue when pending notifications reach the limit,
//!   or when the window opened by the first one times out
//! - **Cursor dequeue**: fetch-and-advance in bounded chunks, watermark only
//!   moves forward
//! - **Recovery**: idle health checks, reconnect with backoff, catch-up drain
//! - **Prometheus metrics**: batches, rows, reconnects, fetch latency
//!
//! ## Example
//!
//! ```ignore
//! use batch_collector::{BatchCollector, BatchEmitter, CollectorConfig};
//!
//! let config = CollectorConfig::new(100, Duration::from_secs(5));
//! let collector = BatchCollector::new(connector, encoder, BatchEmitter::stdout(), config);
//! collector.run(shutdown_rx).await?;
//! ```

mod collector;
mod config;
mod counter;
mod emitter;
mod engine;
mod error;
pub mod metrics;
mod source;

#[cfg(any(test, feature = "testing"))]
pub mod memory;

pub use collector::BatchCollector;
pub use config::CollectorConfig;
pub use counter::NotificationCounter;
pub use emitter::BatchEmitter;
pub use engine::{ChunkSummary, DequeueEngine, DequeueSummary, TriggerReason};
pub use error::{CollectorError, ErrorCategory};
pub use metrics::{CollectorMetrics, init_metrics};
pub use source::{QueueConnection, QueueConnector, QueueRow, RowEncoder};

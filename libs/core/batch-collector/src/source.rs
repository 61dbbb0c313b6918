//! Seams between the collector and the upstream queue / downstream encoding.
//!
//! - `QueueConnector` opens connections (subscribe + prepare happen here)
//! - `QueueConnection` is one live connection: notification signals, health
//!   check and the atomic fetch-and-advance
//! - `RowEncoder` turns one fetched row into its downstream field group

use crate::error::CollectorError;
use async_trait::async_trait;

/// A row returned by the fetch-and-advance operation.
pub trait QueueRow: Send {
    /// Sequence id; the cursor watermark after a fetch is the largest one returned.
    fn seq(&self) -> i64;
}

/// Factory for upstream connections.
///
/// `connect` must leave the connection subscribed to the notification channel
/// with its health-check and dequeue statements prepared. Any failure along
/// the way fails the whole call.
#[async_trait]
pub trait QueueConnector: Send + Sync {
    type Connection: QueueConnection;

    async fn connect(&self) -> Result<Self::Connection, CollectorError>;

    /// Name used in logs and metric labels.
    fn queue_name(&self) -> &str;
}

/// One live upstream connection.
///
/// Implementations never issue overlapping I/O: the collector awaits each
/// call before starting the next one.
#[async_trait]
pub trait QueueConnection: Send + Sized {
    type Row: QueueRow;

    /// Wait until one notification signal has been received and consume it.
    ///
    /// Must be cancel-safe: the collector races it against a timer and the
    /// shutdown signal. A closed connection is reported as
    /// [`CollectorError::ConnectionLost`].
    async fn recv_signal(&mut self) -> Result<(), CollectorError>;

    /// Consume one signal already buffered on the connection without doing I/O.
    fn try_signal(&mut self) -> bool;

    /// Trivial round trip on the prepared health-check statement.
    async fn healthcheck(&mut self) -> Result<(), CollectorError>;

    /// Atomically select up to `max_rows` eligible rows past the watermark,
    /// advance the watermark to the largest returned sequence id, and return
    /// the rows in ascending sequence order.
    async fn fetch_and_advance(&mut self, max_rows: usize)
    -> Result<Vec<Self::Row>, CollectorError>;

    /// Tear the connection down. Closing an already broken connection is fine.
    async fn close(self);
}

/// Encodes a fetched row into its downstream field group.
///
/// An error drops only that row; the rest of the batch is still emitted.
pub trait RowEncoder<R>: Send + Sync {
    type Error: std::fmt::Display;

    fn encode(&self, row: &R) -> Result<String, Self::Error>;
}

//! Dequeue engine: bounded fetch-and-advance, per-row encoding, emission.

use crate::emitter::BatchEmitter;
use crate::error::CollectorError;
use crate::metrics::CollectorMetrics;
use crate::source::{QueueConnection, QueueRow, RowEncoder};
use std::time::{Duration, Instant};
use tokio::io::AsyncWrite;
use tracing::{debug, info, warn};

/// Why a dequeue was started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    /// Pending notifications reached the batch limit
    MaxReached,
    /// The batch window timed out with a partial batch
    Timeout,
    /// Draining the backlog after (re)connecting
    CatchUp,
}

impl TriggerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerReason::MaxReached => "max reached",
            TriggerReason::Timeout => "timeout",
            TriggerReason::CatchUp => "catch-up",
        }
    }

    /// Metric label value
    pub fn label(&self) -> &'static str {
        match self {
            TriggerReason::MaxReached => "max_reached",
            TriggerReason::Timeout => "timeout",
            TriggerReason::CatchUp => "catch_up",
        }
    }
}

/// Outcome of one fetch-and-advance round trip
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkSummary {
    pub fetched: usize,
    pub emitted: usize,
    pub skipped: usize,
}

/// Outcome of a chunked dequeue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DequeueSummary {
    pub fetched: usize,
    pub emitted: usize,
    pub skipped: usize,
    pub chunks: usize,
}

impl DequeueSummary {
    fn add(&mut self, chunk: ChunkSummary) {
        self.fetched += chunk.fetched;
        self.emitted += chunk.emitted;
        self.skipped += chunk.skipped;
        self.chunks += 1;
    }
}

/// Runs the fetch-and-advance operation and turns each chunk into one batch line.
///
/// Keeps the highest sequence id it has handed downstream; a row at or below
/// it is dropped so a misbehaving cursor can never make us emit twice.
pub struct DequeueEngine<E> {
    encoder: E,
    chunk_pause: Duration,
    metrics: CollectorMetrics,
    high_water: Option<i64>,
}

impl<E> DequeueEngine<E> {
    pub fn new(encoder: E, chunk_pause: Duration, metrics: CollectorMetrics) -> Self {
        Self {
            encoder,
            chunk_pause,
            metrics,
            high_water: None,
        }
    }

    /// Highest sequence id seen so far
    pub fn high_water(&self) -> Option<i64> {
        self.high_water
    }

    /// One round trip: fetch up to `max_rows`, encode, emit a single line.
    pub async fn run_chunk<C, W>(
        &mut self,
        conn: &mut C,
        emitter: &mut BatchEmitter<W>,
        max_rows: usize,
        reason: TriggerReason,
    ) -> Result<ChunkSummary, CollectorError>
    where
        C: QueueConnection,
        E: RowEncoder<C::Row>,
        W: AsyncWrite + Unpin + Send,
    {
        let started = Instant::now();
        let rows = conn.fetch_and_advance(max_rows).await?;
        self.metrics.fetch_duration(started.elapsed());

        let fetched = rows.len();
        let mut groups = Vec::with_capacity(fetched);
        let mut skipped = 0;

        for row in &rows {
            let seq = row.seq();
            if let Some(high_water) = self.high_water.filter(|hw| seq <= *hw) {
                warn!(seq, high_water, "Row at or below the emitted watermark, dropping");
                skipped += 1;
                continue;
            }
            self.high_water = Some(seq);

            match self.encoder.encode(row) {
                Ok(group) => groups.push(group),
                Err(e) => {
                    warn!(seq, error = %e, "Skipping row");
                    skipped += 1;
                }
            }
        }

        let emitted = emitter.emit(&groups).await?;

        if skipped > 0 {
            self.metrics.rows_skipped(skipped);
        }
        if emitted > 0 {
            self.metrics.batch_emitted(reason.label(), emitted);
            info!(
                reason = reason.as_str(),
                fetched,
                emitted,
                skipped,
                high_water = ?self.high_water,
                "Batch emitted"
            );
        } else {
            debug!(reason = reason.as_str(), fetched, skipped, "Nothing to emit");
        }

        Ok(ChunkSummary {
            fetched,
            emitted,
            skipped,
        })
    }

    /// Dequeue up to `expected` rows in chunks of at most `max_chunk`.
    ///
    /// Stops early when a chunk comes back empty.
    pub async fn dequeue<C, W>(
        &mut self,
        conn: &mut C,
        emitter: &mut BatchEmitter<W>,
        expected: usize,
        max_chunk: usize,
        reason: TriggerReason,
    ) -> Result<DequeueSummary, CollectorError>
    where
        C: QueueConnection,
        E: RowEncoder<C::Row>,
        W: AsyncWrite + Unpin + Send,
    {
        let mut remaining = expected;
        let mut summary = DequeueSummary::default();

        while remaining > 0 {
            if summary.chunks > 0 {
                self.pause().await;
            }

            let chunk = self
                .run_chunk(conn, emitter, remaining.min(max_chunk), reason)
                .await?;
            summary.add(chunk);

            if chunk.fetched == 0 {
                break;
            }
            remaining = remaining.saturating_sub(chunk.fetched);
        }

        Ok(summary)
    }

    /// Drain the whole backlog: full chunks until one comes back short.
    pub async fn catch_up<C, W>(
        &mut self,
        conn: &mut C,
        emitter: &mut BatchEmitter<W>,
        limit: usize,
    ) -> Result<DequeueSummary, CollectorError>
    where
        C: QueueConnection,
        E: RowEncoder<C::Row>,
        W: AsyncWrite + Unpin + Send,
    {
        let mut summary = DequeueSummary::default();

        loop {
            if summary.chunks > 0 {
                self.pause().await;
            }

            let chunk = self
                .run_chunk(conn, emitter, limit, TriggerReason::CatchUp)
                .await?;
            summary.add(chunk);

            if chunk.fetched < limit {
                return Ok(summary);
            }
        }
    }

    async fn pause(&self) {
        if !self.chunk_pause.is_zero() {
            tokio::time::sleep(self.chunk_pause).await;
        }
    }
}

//! Prometheus metrics for the collector
//!
//! Recording is a no-op until a recorder is installed with [`init_metrics`].

use crate::error::CollectorError;
use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

static EXPORTER: OnceCell<SocketAddr> = OnceCell::new();

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
///
/// Must run inside a Tokio runtime. Subsequent calls are no-ops.
pub fn init_metrics(addr: SocketAddr) -> Result<(), CollectorError> {
    EXPORTER
        .get_or_try_init(|| {
            PrometheusBuilder::new()
                .with_http_listener(addr)
                .install()
                .map_err(|e| {
                    CollectorError::Config(format!("failed to install Prometheus exporter: {e}"))
                })?;
            info!(%addr, "Prometheus exporter listening");
            Ok(addr)
        })
        .map(|_| ())
}

/// Metric helper labelled with the queue name
#[derive(Clone, Debug)]
pub struct CollectorMetrics {
    queue: String,
}

impl CollectorMetrics {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
        }
    }

    /// A batch line was written
    pub fn batch_emitted(&self, reason: &'static str, rows: usize) {
        counter!(
            "token_collector_batches_total",
            "queue" => self.queue.clone(),
            "reason" => reason
        )
        .increment(1);

        counter!("token_collector_rows_emitted_total", "queue" => self.queue.clone())
            .increment(rows as u64);
    }

    /// Rows dropped by the encoder
    pub fn rows_skipped(&self, rows: usize) {
        counter!("token_collector_rows_skipped_total", "queue" => self.queue.clone())
            .increment(rows as u64);
    }

    /// Dequeue returned a different number of rows than notifications suggested
    pub fn count_mismatch(&self) {
        counter!("token_collector_count_mismatch_total", "queue" => self.queue.clone())
            .increment(1);
    }

    pub fn reconnect(&self) {
        counter!("token_collector_reconnects_total", "queue" => self.queue.clone()).increment(1);
    }

    pub fn healthcheck(&self, healthy: bool) {
        counter!(
            "token_collector_healthchecks_total",
            "queue" => self.queue.clone(),
            "status" => if healthy { "ok" } else { "failed" }
        )
        .increment(1);
    }

    /// Duration of one fetch-and-advance round trip
    pub fn fetch_duration(&self, duration: Duration) {
        histogram!(
            "token_collector_fetch_duration_seconds",
            "queue" => self.queue.clone()
        )
        .record(duration.as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        let metrics = CollectorMetrics::new("tokens");
        metrics.batch_emitted("timeout", 3);
        metrics.rows_skipped(1);
        metrics.count_mismatch();
        metrics.reconnect();
        metrics.healthcheck(true);
        metrics.fetch_duration(Duration::from_millis(5));
    }
}

//! Scheduler loop: notification wakeups, batch windows, health checks and
//! reconnect with catch-up.

use crate::config::CollectorConfig;
use crate::counter::NotificationCounter;
use crate::emitter::BatchEmitter;
use crate::engine::{DequeueEngine, TriggerReason};
use crate::error::CollectorError;
use crate::metrics::CollectorMetrics;
use crate::source::{QueueConnection, QueueConnector, RowEncoder};
use database::common::retry_with_backoff;
use tokio::io::AsyncWrite;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

type RowOf<C> = <<C as QueueConnector>::Connection as QueueConnection>::Row;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    NeedsReconnect,
    Waiting,
    ReadyToDequeue(TriggerReason),
    Shutdown,
}

enum Wake {
    Shutdown,
    Signal(Result<(), CollectorError>),
    Timer,
}

/// Per-connection loop state
struct Session<Conn> {
    conn: Option<Conn>,
    counter: NotificationCounter,
    last_healthcheck: Instant,
    /// Transient failures since the last successful dequeue or health check
    failures: u32,
}

/// Notification-driven batching collector.
///
/// One connection, one task. The loop moves between three phases:
///
/// - `Waiting`: block on the next notification, the batch timeout or (while
///   idle) the health-check interval
/// - `ReadyToDequeue`: pending count reached the limit, or the window opened
///   by the first pending notification timed out
/// - `NeedsReconnect`: any transient failure; the connection is replaced using
///   the reconnect backoff and the backlog is drained before waiting again
///
/// The limit wins over the timeout when both hold. Fatal errors end `run`.
///
/// Consecutive failures without a successful dequeue or health check in
/// between are paced by the same backoff schedule as connect attempts, and
/// running out of it is fatal.
pub struct BatchCollector<C, E, W>
where
    C: QueueConnector,
{
    connector: C,
    engine: DequeueEngine<E>,
    emitter: BatchEmitter<W>,
    config: CollectorConfig,
    metrics: CollectorMetrics,
}

impl<C, E, W> BatchCollector<C, E, W>
where
    C: QueueConnector,
    E: RowEncoder<RowOf<C>>,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(connector: C, encoder: E, emitter: BatchEmitter<W>, config: CollectorConfig) -> Self {
        let metrics = CollectorMetrics::new(connector.queue_name());
        let engine = DequeueEngine::new(encoder, config.chunk_pause, metrics.clone());

        Self {
            connector,
            engine,
            emitter,
            config,
            metrics,
        }
    }

    /// Run until shutdown is requested or a fatal error occurs.
    ///
    /// The first connect is attempted once; failing it is fatal.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), CollectorError> {
        info!(
            queue = %self.connector.queue_name(),
            batch_limit = self.config.batch_limit,
            batch_timeout_ms = self.config.batch_timeout.as_millis() as u64,
            healthcheck_interval_ms = self.config.healthcheck_interval.as_millis() as u64,
            "Starting batch collector"
        );

        let mut conn = self.connector.connect().await.map_err(|e| {
            error!(error = %e, "Initial connect failed");
            e
        })?;
        info!(queue = %self.connector.queue_name(), "Connected, listening for notifications");

        let mut phase = self.catch_up(&mut conn).await?;
        let mut session = Session {
            conn: Some(conn),
            counter: NotificationCounter::new(),
            last_healthcheck: Instant::now(),
            failures: u32::from(phase == Phase::NeedsReconnect),
        };

        loop {
            if *shutdown.borrow() {
                info!("Received shutdown signal, stopping collector");
                break;
            }

            phase = match phase {
                Phase::NeedsReconnect => self.reconnect(&mut session).await?,
                Phase::Waiting => self.wait(&mut session, &mut shutdown).await?,
                Phase::ReadyToDequeue(reason) => self.dequeue(&mut session, reason).await?,
                Phase::Shutdown => {
                    info!("Received shutdown signal, stopping collector");
                    break;
                }
            };

            if phase == Phase::NeedsReconnect {
                session.failures += 1;
            }
        }

        if let Some(conn) = session.conn.take() {
            conn.close().await;
        }
        info!(lines = self.emitter.lines_written(), "Batch collector stopped");
        Ok(())
    }

    fn trigger(&self, counter: &NotificationCounter) -> Option<TriggerReason> {
        if counter.count() >= self.config.batch_limit {
            Some(TriggerReason::MaxReached)
        } else if counter.timed_out(self.config.batch_timeout) {
            Some(TriggerReason::Timeout)
        } else {
            None
        }
    }

    fn next_phase(&self, counter: &NotificationCounter) -> Phase {
        self.trigger(counter)
            .map(Phase::ReadyToDequeue)
            .unwrap_or(Phase::Waiting)
    }

    /// Sort an error into "reconnect" or "stop".
    fn recover(&self, err: CollectorError, what: &str) -> Result<Phase, CollectorError> {
        if err.is_fatal() {
            error!(error = %err, category = err.category().as_str(), "{what} failed");
            return Err(err);
        }
        warn!(error = %err, category = err.category().as_str(), "{what} failed, reconnecting");
        Ok(Phase::NeedsReconnect)
    }

    async fn wait(
        &mut self,
        session: &mut Session<C::Connection>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Phase, CollectorError> {
        let Some(conn) = session.conn.as_mut() else {
            return Ok(Phase::NeedsReconnect);
        };

        session.counter.drain_pending(conn);
        if let Some(reason) = self.trigger(&session.counter) {
            return Ok(Phase::ReadyToDequeue(reason));
        }

        let sleep_for = session.counter.remaining(self.config.batch_timeout);

        let wake = tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    Wake::Shutdown
                } else {
                    Wake::Timer
                }
            }
            received = conn.recv_signal() => Wake::Signal(received),
            _ = tokio::time::sleep(sleep_for) => Wake::Timer,
        };

        match wake {
            Wake::Shutdown => Ok(Phase::Shutdown),
            Wake::Signal(Ok(())) => {
                session.counter.record(1);
                session.counter.drain_pending(conn);
                Ok(self.next_phase(&session.counter))
            }
            Wake::Signal(Err(e)) => self.recover(e, "Consuming input"),
            Wake::Timer => {
                session.counter.drain_pending(conn);
                if let Some(reason) = self.trigger(&session.counter) {
                    return Ok(Phase::ReadyToDequeue(reason));
                }

                let idle = session.counter.is_empty();
                if idle && session.last_healthcheck.elapsed() >= self.config.healthcheck_interval {
                    session.last_healthcheck = Instant::now();
                    match conn.healthcheck().await {
                        Ok(()) => {
                            self.metrics.healthcheck(true);
                            session.failures = 0;
                            debug!("Health check passed");
                        }
                        Err(e) => {
                            self.metrics.healthcheck(false);
                            return self.recover(e, "Health check");
                        }
                    }
                }
                Ok(Phase::Waiting)
            }
        }
    }

    async fn dequeue(
        &mut self,
        session: &mut Session<C::Connection>,
        reason: TriggerReason,
    ) -> Result<Phase, CollectorError> {
        let Some(conn) = session.conn.as_mut() else {
            return Ok(Phase::NeedsReconnect);
        };

        let expected = session.counter.count();
        info!(reason = reason.as_str(), pending = expected, "Dequeue triggered");

        let result = self
            .engine
            .dequeue(conn, &mut self.emitter, expected, self.config.batch_limit, reason)
            .await;

        match result {
            Ok(summary) => {
                if summary.fetched != expected {
                    self.metrics.count_mismatch();
                    warn!(
                        expected,
                        fetched = summary.fetched,
                        "Processed row count differs from notification count"
                    );
                }
                session.counter.reset();
                session.last_healthcheck = Instant::now();
                session.failures = 0;
                Ok(Phase::Waiting)
            }
            Err(e) => self.recover(e, "Dequeue"),
        }
    }

    /// Drain the backlog left behind while we were not listening.
    async fn catch_up(&mut self, conn: &mut C::Connection) -> Result<Phase, CollectorError> {
        match self
            .engine
            .catch_up(conn, &mut self.emitter, self.config.batch_limit)
            .await
        {
            Ok(summary) => {
                if summary.fetched > 0 {
                    info!(
                        fetched = summary.fetched,
                        emitted = summary.emitted,
                        chunks = summary.chunks,
                        "Catch-up drain complete"
                    );
                } else {
                    debug!("Nothing to catch up on");
                }
                Ok(Phase::Waiting)
            }
            Err(e) => self.recover(e, "Catch-up"),
        }
    }

    /// Replace the connection, then catch up. Exhausting the backoff is fatal.
    ///
    /// The first failure reconnects at once; each further failure in a row
    /// waits for the next delay of the reconnect schedule first.
    async fn reconnect(&mut self, session: &mut Session<C::Connection>) -> Result<Phase, CollectorError> {
        if let Some(old) = session.conn.take() {
            old.close().await;
        }

        if session.failures > 1 {
            let step = (session.failures - 2) as usize;
            match self.config.reconnect.backoff().nth(step) {
                Some(delay) => {
                    warn!(
                        failures = session.failures,
                        delay_ms = delay.as_millis() as u64,
                        "Repeated failures, backing off before reconnect"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    error!(failures = session.failures, "Giving up after repeated failures");
                    return Err(CollectorError::ReconnectExhausted(format!(
                        "{} consecutive failures",
                        session.failures
                    )));
                }
            }
        }

        self.metrics.reconnect();
        warn!(queue = %self.connector.queue_name(), "Reconnecting");

        let connector = &self.connector;
        let mut conn = retry_with_backoff(
            move |attempt| {
                debug!(attempt, "Reconnect attempt");
                connector.connect()
            },
            self.config.reconnect.clone(),
        )
        .await
        .map_err(|e| {
            error!(error = %e, "Giving up on reconnect");
            CollectorError::ReconnectExhausted(e.to_string())
        })?;
        info!(queue = %self.connector.queue_name(), "Reconnected");

        session.counter.reset();
        session.last_healthcheck = Instant::now();

        let phase = self.catch_up(&mut conn).await?;
        session.conn = Some(conn);
        Ok(phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryQueue, MemoryRow, PlainEncoder, SharedBuffer};
    use database::RetryConfig;
    use std::time::Duration;
    use tokio::task::JoinHandle;
    use tokio::time::sleep;

    fn config(limit: usize, timeout_ms: u64) -> CollectorConfig {
        CollectorConfig::new(limit, Duration::from_millis(timeout_ms))
            .with_chunk_pause(Duration::ZERO)
            .with_reconnect(RetryConfig::new().with_max_retries(2).without_jitter())
    }

    struct Harness {
        queue: MemoryQueue,
        out: SharedBuffer,
        shutdown: watch::Sender<bool>,
        handle: JoinHandle<Result<(), CollectorError>>,
    }

    impl Harness {
        async fn start(queue: MemoryQueue, config: CollectorConfig) -> Self {
            let out = SharedBuffer::new();
            let (shutdown, rx) = watch::channel(false);
            let collector = BatchCollector::new(
                queue.clone(),
                PlainEncoder,
                BatchEmitter::new(out.clone()),
                config,
            );
            let handle = tokio::spawn(collector.run(rx));
            // let startup catch-up finish
            sleep(Duration::from_millis(10)).await;

            Self {
                queue,
                out,
                shutdown,
                handle,
            }
        }

        async fn stop(self) -> Result<(), CollectorError> {
            let _ = self.shutdown.send(true);
            self.handle.await.unwrap()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_limit_triggers_before_timeout() {
        let h = Harness::start(MemoryQueue::new("test"), config(3, 5000)).await;

        for _ in 0..3 {
            h.queue.push(MemoryRow::valid());
        }
        sleep(Duration::from_millis(100)).await;

        assert_eq!(h.out.lines(), vec!["1,2,3"]);
        h.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_batch_waits_for_timeout() {
        let h = Harness::start(MemoryQueue::new("test"), config(10, 5000)).await;

        h.queue.push(MemoryRow::valid());
        h.queue.push(MemoryRow::valid());

        sleep(Duration::from_millis(4900)).await;
        assert!(h.out.lines().is_empty());

        sleep(Duration::from_millis(200)).await;
        assert_eq!(h.out.lines(), vec!["1,2"]);
        h.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_measured_from_first_notification() {
        let h = Harness::start(MemoryQueue::new("test"), config(3, 5000)).await;

        // t=0..2s: three items fill the batch
        h.queue.push(MemoryRow::valid());
        sleep(Duration::from_secs(1)).await;
        h.queue.push(MemoryRow::valid());
        sleep(Duration::from_secs(1)).await;
        h.queue.push(MemoryRow::valid());
        sleep(Duration::from_millis(50)).await;
        assert_eq!(h.out.lines(), vec!["1,2,3"]);

        // t=3s: a lone item opens a fresh window closing at t=8s
        sleep(Duration::from_millis(950)).await;
        h.queue.push(MemoryRow::valid());

        sleep(Duration::from_millis(4900)).await;
        assert_eq!(h.out.lines().len(), 1);

        sleep(Duration::from_millis(200)).await;
        assert_eq!(h.out.lines(), vec!["1,2,3", "4"]);
        h.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_five_quick_items_split_into_limit_and_timeout_batches() {
        let h = Harness::start(MemoryQueue::new("test"), config(3, 5000)).await;

        for _ in 0..5 {
            h.queue.push(MemoryRow::valid());
            sleep(Duration::from_millis(1)).await;
        }
        sleep(Duration::from_millis(50)).await;
        assert_eq!(h.out.lines(), vec!["1,2,3"]);

        sleep(Duration::from_millis(4900)).await;
        assert_eq!(h.out.lines().len(), 1);

        sleep(Duration::from_millis(200)).await;
        assert_eq!(h.out.lines(), vec!["1,2,3", "4,5"]);
        h.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_drains_backlog() {
        let queue = MemoryQueue::new("test");
        for _ in 0..5 {
            queue.push_silent(MemoryRow::valid());
        }

        let h = Harness::start(queue, config(2, 5000)).await;

        assert_eq!(h.out.lines(), vec!["1,2", "3,4", "5"]);
        assert_eq!(h.queue.watermark(), 5);
        h.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_healthcheck_reconnects_and_catches_up() {
        let queue = MemoryQueue::new("test");
        let h = Harness::start(
            queue,
            config(10, 500).with_healthcheck_interval(Duration::from_millis(1000)),
        )
        .await;

        h.queue.fail_healthchecks(1);
        h.queue.push_silent(MemoryRow::valid());

        sleep(Duration::from_millis(1600)).await;

        assert_eq!(h.queue.connects(), 2);
        assert!(h.queue.healthchecks() >= 1);
        assert_eq!(h.out.lines(), vec!["1"]);
        h.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthcheck_skipped_while_batch_pending() {
        let queue = MemoryQueue::new("test");
        let h = Harness::start(
            queue,
            config(10, 5000).with_healthcheck_interval(Duration::from_millis(100)),
        )
        .await;

        h.queue.push(MemoryRow::valid());
        sleep(Duration::from_millis(4000)).await;

        assert_eq!(h.queue.healthchecks(), 0);
        h.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_drop_catches_up_without_duplicates() {
        let h = Harness::start(MemoryQueue::new("test"), config(2, 5000)).await;

        h.queue.push(MemoryRow::valid());
        h.queue.push(MemoryRow::valid());
        sleep(Duration::from_millis(50)).await;
        assert_eq!(h.out.lines(), vec!["1,2"]);

        // inserted while the connection is going away, nobody hears about it
        h.queue.push_silent(MemoryRow::valid());
        h.queue.break_connections();
        sleep(Duration::from_millis(50)).await;

        assert_eq!(h.queue.connects(), 2);
        assert_eq!(h.out.lines(), vec!["1,2", "3"]);

        h.queue.push(MemoryRow::valid());
        h.queue.push(MemoryRow::valid());
        sleep(Duration::from_millis(50)).await;

        assert_eq!(h.out.lines(), vec!["1,2", "3", "4,5"]);
        h.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_backs_off_until_server_returns() {
        let h = Harness::start(MemoryQueue::new("test"), config(2, 5000)).await;

        h.queue.fail_connects(2);
        h.queue.break_connections();
        sleep(Duration::from_secs(1)).await;

        assert_eq!(h.queue.connects(), 2);
        h.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_exhaustion_is_fatal() {
        let h = Harness::start(MemoryQueue::new("test"), config(2, 5000)).await;

        h.queue.fail_connects(10);
        h.queue.break_connections();

        let err = h.handle.await.unwrap().unwrap_err();
        assert!(matches!(err, CollectorError::ReconnectExhausted(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_fetch_failure_backs_off_then_gives_up() {
        let h = Harness::start(MemoryQueue::new("test"), config(2, 5000)).await;

        h.queue.fail_fetches(1000);
        let started = Instant::now();
        h.queue.push(MemoryRow::valid());
        h.queue.push(MemoryRow::valid());

        let err = h.handle.await.unwrap().unwrap_err();

        assert!(matches!(err, CollectorError::ReconnectExhausted(_)));
        // first failure reconnects at once, then 100ms and 200ms pauses
        assert_eq!(h.queue.connects(), 4);
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(h.out.lines().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_failures_pause_and_reset_after_dequeue() {
        let h = Harness::start(MemoryQueue::new("test"), config(2, 5000)).await;

        h.queue.fail_fetches(2);
        h.queue.push(MemoryRow::valid());
        h.queue.push(MemoryRow::valid());

        // dequeue and the first catch-up fail, second reconnect waits 100ms
        sleep(Duration::from_millis(50)).await;
        assert_eq!(h.queue.connects(), 2);
        assert!(h.out.lines().is_empty());

        sleep(Duration::from_millis(150)).await;
        assert_eq!(h.queue.connects(), 3);
        assert_eq!(h.out.lines(), vec!["1,2"]);

        h.queue.push(MemoryRow::valid());
        h.queue.push(MemoryRow::valid());
        sleep(Duration::from_millis(50)).await;
        assert_eq!(h.out.lines(), vec!["1,2", "3,4"]);

        // streak was reset by the dequeue, so this failure reconnects at once
        h.queue.fail_fetches(1);
        h.queue.push(MemoryRow::valid());
        h.queue.push(MemoryRow::valid());
        sleep(Duration::from_millis(50)).await;
        assert_eq!(h.queue.connects(), 4);
        assert_eq!(h.out.lines(), vec!["1,2", "3,4", "5,6"]);

        h.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_connect_failure_is_fatal() {
        let queue = MemoryQueue::new("test");
        queue.fail_connects(1);
        let (_tx, rx) = watch::channel(false);

        let collector = BatchCollector::new(
            queue.clone(),
            PlainEncoder,
            BatchEmitter::new(SharedBuffer::new()),
            config(2, 5000),
        );
        let err = collector.run(rx).await.unwrap_err();

        assert!(matches!(err, CollectorError::Connect(_)));
        assert_eq!(queue.connects(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schema_mismatch_is_fatal() {
        let queue = MemoryQueue::new("test");
        queue.set_schema_mismatch(true);
        let (_tx, rx) = watch::channel(false);

        let collector = BatchCollector::new(
            queue,
            PlainEncoder,
            BatchEmitter::new(SharedBuffer::new()),
            config(2, 5000),
        );
        let err = collector.run(rx).await.unwrap_err();

        assert!(err.is_fatal());
        assert!(matches!(err, CollectorError::SchemaMismatch(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_emit_failure_is_fatal() {
        let h = Harness::start(MemoryQueue::new("test"), config(1, 5000)).await;

        h.out.close_pipe();
        h.queue.push(MemoryRow::valid());

        let err = h.handle.await.unwrap().unwrap_err();
        assert!(matches!(err, CollectorError::Emit(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_row_does_not_stop_batch() {
        let h = Harness::start(MemoryQueue::new("test"), config(3, 5000)).await;

        h.queue.push(MemoryRow::valid());
        h.queue.push(MemoryRow::malformed());
        h.queue.push(MemoryRow::valid());
        sleep(Duration::from_millis(50)).await;

        assert_eq!(h.out.lines(), vec!["1,3"]);
        assert_eq!(h.queue.watermark(), 3);
        h.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_mismatch_keeps_running() {
        let h = Harness::start(MemoryQueue::new("test"), config(2, 5000)).await;

        h.queue.push(MemoryRow::valid());
        h.queue.push(MemoryRow::ineligible());
        sleep(Duration::from_millis(50)).await;
        assert_eq!(h.out.lines(), vec!["1"]);

        h.queue.push(MemoryRow::valid());
        h.queue.push(MemoryRow::valid());
        sleep(Duration::from_millis(50)).await;
        assert_eq!(h.out.lines(), vec!["1", "3,4"]);
        h.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_idle_collector() {
        let h = Harness::start(MemoryQueue::new("test"), config(2, 5000)).await;

        h.queue.push(MemoryRow::valid());
        h.stop().await.unwrap();
    }
}

//! Pending notification counter and batch window clock.

use crate::source::QueueConnection;
use std::time::Duration;
use tokio::time::Instant;

/// Counts notification signals seen since the last dequeue.
///
/// The batch window opens when the count goes from zero to non-zero; the
/// timeout is measured from that instant, not from the last dequeue.
#[derive(Debug, Default)]
pub struct NotificationCounter {
    count: usize,
    window_start: Option<Instant>,
}

impl NotificationCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pending signals since the last reset
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Add `observed` signals, opening the window on the first one.
    pub fn record(&mut self, observed: usize) {
        if observed == 0 {
            return;
        }
        if self.count == 0 {
            self.window_start = Some(Instant::now());
        }
        self.count += observed;
    }

    /// Drain every signal already buffered on `conn`; returns how many were seen.
    pub fn drain_pending<C: QueueConnection>(&mut self, conn: &mut C) -> usize {
        let mut observed = 0;
        while conn.try_signal() {
            observed += 1;
        }
        self.record(observed);
        observed
    }

    /// Time since the window opened, `None` while nothing is pending
    pub fn window_elapsed(&self) -> Option<Duration> {
        self.window_start.map(|start| start.elapsed())
    }

    /// Whether a non-empty window has been open for at least `timeout`
    pub fn timed_out(&self, timeout: Duration) -> bool {
        self.window_elapsed().is_some_and(|elapsed| elapsed >= timeout)
    }

    /// How long the wait primitive may sleep before the window times out.
    ///
    /// With nothing pending this is the full timeout.
    pub fn remaining(&self, timeout: Duration) -> Duration {
        match self.window_elapsed() {
            Some(elapsed) => timeout.saturating_sub(elapsed),
            None => timeout,
        }
    }

    /// Forget pending signals and close the window
    pub fn reset(&mut self) {
        self.count = 0;
        self.window_start = None;
    }
}

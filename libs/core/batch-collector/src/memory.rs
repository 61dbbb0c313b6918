//! In-memory queue for exercising the collector without a database.
//!
//! Behaves like a LISTEN/NOTIFY table queue: every live connection has its own
//! signal buffer, rows carry an eligibility flag, and fetch-and-advance moves
//! a single shared watermark. Faults can be injected per call.

use crate::error::CollectorError;
use crate::source::{QueueConnection, QueueConnector, QueueRow, RowEncoder};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;
use tokio::sync::Notify;

/// Row stored in a [`MemoryQueue`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRow {
    pub seq: i64,
    pub eligible: bool,
    pub malformed: bool,
}

impl MemoryRow {
    pub fn valid() -> Self {
        Self {
            seq: 0,
            eligible: true,
            malformed: false,
        }
    }

    /// Eligible but rejected by [`PlainEncoder`]
    pub fn malformed() -> Self {
        Self {
            malformed: true,
            ..Self::valid()
        }
    }

    /// Never returned by fetch-and-advance
    pub fn ineligible() -> Self {
        Self {
            eligible: false,
            ..Self::valid()
        }
    }
}

impl QueueRow for MemoryRow {
    fn seq(&self) -> i64 {
        self.seq
    }
}

/// Encodes a row as its sequence id
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainEncoder;

impl RowEncoder<MemoryRow> for PlainEncoder {
    type Error = String;

    fn encode(&self, row: &MemoryRow) -> Result<String, Self::Error> {
        if row.malformed {
            return Err(format!("row {} is malformed", row.seq));
        }
        Ok(row.seq.to_string())
    }
}

#[derive(Default)]
struct Inner {
    rows: Vec<MemoryRow>,
    next_seq: i64,
    watermark: i64,
    next_conn_id: u64,
    /// Connections with an id below this are dead
    broken_below: u64,
    listeners: HashMap<u64, usize>,
    connects: usize,
    connect_failures: usize,
    healthcheck_failures: usize,
    fetch_failures: usize,
    healthchecks: usize,
    schema_mismatch: bool,
}

/// Shared handle; clones see the same queue.
#[derive(Clone)]
pub struct MemoryQueue {
    name: String,
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Arc::new(Mutex::new(Inner::default())),
            notify: Arc::new(Notify::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a row and signal every live connection. Returns its sequence id.
    pub fn push(&self, row: MemoryRow) -> i64 {
        let seq = self.push_silent(row);
        {
            let mut inner = self.lock();
            let broken_below = inner.broken_below;
            for (id, pending) in inner.listeners.iter_mut() {
                if *id >= broken_below {
                    *pending += 1;
                }
            }
        }
        self.notify.notify_waiters();
        seq
    }

    /// Insert a row without signalling anyone.
    pub fn push_silent(&self, mut row: MemoryRow) -> i64 {
        let mut inner = self.lock();
        inner.next_seq += 1;
        row.seq = inner.next_seq;
        inner.rows.push(row);
        inner.next_seq
    }

    pub fn watermark(&self) -> i64 {
        self.lock().watermark
    }

    /// Move the watermark, as an operator resetting the cursor would.
    pub fn rewind(&self, watermark: i64) {
        self.lock().watermark = watermark;
    }

    /// Kill every connection opened so far.
    pub fn break_connections(&self) {
        {
            let mut inner = self.lock();
            inner.broken_below = inner.next_conn_id;
        }
        self.notify.notify_waiters();
    }

    /// Make the next `n` connect attempts fail.
    pub fn fail_connects(&self, n: usize) {
        self.lock().connect_failures = n;
    }

    /// Make the next `n` health checks fail.
    pub fn fail_healthchecks(&self, n: usize) {
        self.lock().healthcheck_failures = n;
    }

    /// Make the next `n` fetches fail with a transient error.
    pub fn fail_fetches(&self, n: usize) {
        self.lock().fetch_failures = n;
    }

    /// Make every fetch fail with a schema mismatch.
    pub fn set_schema_mismatch(&self, mismatch: bool) {
        self.lock().schema_mismatch = mismatch;
    }

    /// Successful connects so far
    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    /// Health checks attempted so far
    pub fn healthchecks(&self) -> usize {
        self.lock().healthchecks
    }
}

#[async_trait]
impl QueueConnector for MemoryQueue {
    type Connection = MemoryConnection;

    async fn connect(&self) -> Result<Self::Connection, CollectorError> {
        let mut inner = self.lock();
        if inner.connect_failures > 0 {
            inner.connect_failures -= 1;
            return Err(CollectorError::Connect("connection refused".to_string()));
        }

        let id = inner.next_conn_id;
        inner.next_conn_id += 1;
        inner.listeners.insert(id, 0);
        inner.connects += 1;

        Ok(MemoryConnection {
            id,
            queue: self.clone(),
        })
    }

    fn queue_name(&self) -> &str {
        &self.name
    }
}

/// One connection to a [`MemoryQueue`]
pub struct MemoryConnection {
    id: u64,
    queue: MemoryQueue,
}

impl MemoryConnection {
    fn is_broken(inner: &Inner, id: u64) -> bool {
        id < inner.broken_below
    }

    /// Consume one buffered signal. `Err` once the connection is dead.
    fn take_signal(&self) -> Result<bool, CollectorError> {
        let mut inner = self.queue.lock();
        if Self::is_broken(&inner, self.id) {
            return Err(CollectorError::ConnectionLost);
        }
        match inner.listeners.get_mut(&self.id) {
            Some(pending) if *pending > 0 => {
                *pending -= 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl QueueConnection for MemoryConnection {
    type Row = MemoryRow;

    async fn recv_signal(&mut self) -> Result<(), CollectorError> {
        let notify = self.queue.notify.clone();
        loop {
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.take_signal()? {
                return Ok(());
            }
            notified.await;
        }
    }

    fn try_signal(&mut self) -> bool {
        self.take_signal().unwrap_or(false)
    }

    async fn healthcheck(&mut self) -> Result<(), CollectorError> {
        let mut inner = self.queue.lock();
        inner.healthchecks += 1;
        if Self::is_broken(&inner, self.id) {
            return Err(CollectorError::HealthCheck("connection closed".to_string()));
        }
        if inner.healthcheck_failures > 0 {
            inner.healthcheck_failures -= 1;
            return Err(CollectorError::HealthCheck("server closed the connection".to_string()));
        }
        Ok(())
    }

    async fn fetch_and_advance(
        &mut self,
        max_rows: usize,
    ) -> Result<Vec<Self::Row>, CollectorError> {
        let mut inner = self.queue.lock();
        if Self::is_broken(&inner, self.id) {
            return Err(CollectorError::Connection("connection closed".to_string()));
        }
        if inner.schema_mismatch {
            return Err(CollectorError::SchemaMismatch(
                "no column found for name: secret".to_string(),
            ));
        }
        if inner.fetch_failures > 0 {
            inner.fetch_failures -= 1;
            return Err(CollectorError::Connection(
                "canceling statement due to statement timeout".to_string(),
            ));
        }

        let watermark = inner.watermark;
        let picked: Vec<MemoryRow> = inner
            .rows
            .iter()
            .filter(|row| row.seq > watermark && row.eligible)
            .take(max_rows)
            .cloned()
            .collect();

        if let Some(last) = picked.last() {
            inner.watermark = last.seq;
        }
        Ok(picked)
    }

    async fn close(self) {
        self.queue.lock().listeners.remove(&self.id);
    }
}

/// Clonable in-memory sink standing in for stdout
#[derive(Clone, Default)]
pub struct SharedBuffer {
    buf: Arc<Mutex<Vec<u8>>>,
    broken: Arc<AtomicBool>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, split into lines
    pub fn lines(&self) -> Vec<String> {
        let buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buf)
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Fail every write from now on, like a closed pipe.
    pub fn close_pipe(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }
}

impl AsyncWrite for SharedBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.broken.load(Ordering::SeqCst) {
            return Poll::Ready(Err(io::Error::from(io::ErrorKind::BrokenPipe)));
        }
        self.buf
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(data);
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

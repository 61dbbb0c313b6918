//! PostgreSQL queue: LISTEN/NOTIFY wakeups plus the `dequeue_tokens`
//! fetch-and-advance function, all on one connection.

use async_trait::async_trait;
use batch_collector::{CollectorError, QueueConnection, QueueConnector};
use database::postgres::{HEALTH_CHECK_QUERY, PgListener, PgPool, PostgresConfig, check_health, connect_from_config};
use sqlx::postgres::PgRow;
use sqlx::{Executor, Row};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::TokenCollectorConfig;
use crate::models::WorkItem;

/// Atomic fetch-and-advance; returns eligible rows in ascending `seq` order
pub const DEQUEUE_SQL: &str =
    "SELECT seq, action, email, username, secret, code FROM dequeue_tokens($1, $2)";

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLSTATEs meaning the schema no longer matches what we expect
const SCHEMA_SQLSTATES: [&str; 3] = [
    "42703", // undefined_column
    "42883", // undefined_function
    "42P01", // undefined_table
];

/// Sort a driver error into fatal schema drift or a transient connection problem.
pub fn classify(err: sqlx::Error) -> CollectorError {
    let schema_drift = match &err {
        sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnIndexOutOfBounds { .. } => true,
        sqlx::Error::Database(db) => db
            .code()
            .is_some_and(|code| SCHEMA_SQLSTATES.iter().any(|state| code == *state)),
        _ => false,
    };

    if schema_drift {
        CollectorError::SchemaMismatch(err.to_string())
    } else {
        CollectorError::Connection(err.to_string())
    }
}

fn work_item_from_row(row: &PgRow) -> Result<WorkItem, sqlx::Error> {
    Ok(WorkItem {
        seq: row.try_get("seq")?,
        action: row.try_get("action")?,
        email: row.try_get("email")?,
        username: row.try_get("username")?,
        secret: row.try_get("secret")?,
        code: row.try_get("code")?,
    })
}

/// Opens listening connections for one queue
#[derive(Debug, Clone)]
pub struct PgQueueConnector {
    config: PostgresConfig,
    channel: String,
    queue: String,
}

impl PgQueueConnector {
    pub fn new(config: PostgresConfig, channel: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            config,
            channel: channel.into(),
            queue: queue.into(),
        }
    }

    pub fn from_config(config: &TokenCollectorConfig) -> Self {
        Self::new(config.database.clone(), &config.channel, &config.queue)
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl QueueConnector for PgQueueConnector {
    type Connection = PgQueueConnection;

    async fn connect(&self) -> Result<PgQueueConnection, CollectorError> {
        let pool = connect_from_config(&self.config)
            .await
            .map_err(|e| CollectorError::Connect(e.to_string()))?;

        let mut listener = PgListener::connect_with(&pool)
            .await
            .map_err(|e| CollectorError::Connect(e.to_string()))?;

        let prepared = async {
            listener.listen(&self.channel).await?;
            (&mut listener).prepare(HEALTH_CHECK_QUERY).await?;
            (&mut listener).prepare(DEQUEUE_SQL).await?;
            Ok::<_, sqlx::Error>(())
        }
        .await;

        if let Err(e) = prepared {
            drop(listener);
            pool.close().await;
            return Err(CollectorError::Connect(e.to_string()));
        }

        info!(channel = %self.channel, queue = %self.queue, "Listening for notifications");

        Ok(PgQueueConnection {
            listener,
            pool,
            queue: self.queue.clone(),
        })
    }

    fn queue_name(&self) -> &str {
        &self.queue
    }
}

/// A subscribed connection with both statements prepared
pub struct PgQueueConnection {
    listener: PgListener,
    pool: PgPool,
    queue: String,
}

#[async_trait]
impl QueueConnection for PgQueueConnection {
    type Row = WorkItem;

    async fn recv_signal(&mut self) -> Result<(), CollectorError> {
        // try_recv reports a dropped connection instead of silently reconnecting
        match self.listener.try_recv().await {
            Ok(Some(notification)) => {
                debug!(channel = notification.channel(), "Notification received");
                Ok(())
            }
            Ok(None) => Err(CollectorError::ConnectionLost),
            Err(e) => Err(classify(e)),
        }
    }

    fn try_signal(&mut self) -> bool {
        self.listener.next_buffered().is_some()
    }

    async fn healthcheck(&mut self) -> Result<(), CollectorError> {
        check_health(&mut self.listener)
            .await
            .map_err(|e| CollectorError::HealthCheck(e.to_string()))
    }

    async fn fetch_and_advance(
        &mut self,
        max_rows: usize,
    ) -> Result<Vec<WorkItem>, CollectorError> {
        let max_rows = i32::try_from(max_rows).unwrap_or(i32::MAX);

        let rows = sqlx::query(DEQUEUE_SQL)
            .bind(&self.queue)
            .bind(max_rows)
            .fetch_all(&mut self.listener)
            .await
            .map_err(classify)?;

        rows.iter()
            .map(work_item_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(classify)
    }

    async fn close(self) {
        drop(self.listener);
        if tokio::time::timeout(CLOSE_TIMEOUT, self.pool.close()).await.is_err() {
            warn!(queue = %self.queue, "Timed out closing connection");
        }
    }
}

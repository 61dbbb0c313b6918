//! Token Collector Service
//!
//! Turns account tokens queued in PostgreSQL into signed batch lines for the
//! mail sender.
//!
//! ## Architecture
//!
//! ```text
//! INSERT INTO tokens
//!   ↓ (trigger: NOTIFY token_insert)
//! BatchCollector<PgQueueConnector, TokenEncoder>
//!   ↓ (limit reached or batch window timed out)
//! dequeue_tokens(queue, n)  -- advances the cursor
//!   ↓ (HMAC-SHA256, base64 URL-safe)
//! stdout: action,email,username,token,code[,...]
//! ```
//!
//! Logs go to stderr; stdout carries nothing but batch lines.

use batch_collector::{BatchCollector, BatchEmitter, init_metrics};
use core_config::{Environment, FromEnv, app_info};
use domain_tokens::{PgQueueConnector, TokenCollectorConfig, TokenEncoder};
use eyre::{Result, WrapErr};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

/// Run the token collector
///
/// 1. Sets up error reports and logging (JSON for prod, pretty for dev, both on stderr)
/// 2. Loads configuration from the environment
/// 3. Optionally starts the Prometheus exporter
/// 4. Runs the collector until SIGINT/SIGTERM or a fatal error
///
/// # Errors
///
/// Returns an error if configuration is missing or malformed, the first
/// connection cannot be established, or the collector hits a fatal error
/// (schema drift, stdout closed, reconnect attempts exhausted).
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    let app_info = app_info!();
    info!(name = %app_info.name, version = %app_info.version, "Starting token collector");
    info!("Environment: {:?}", environment);

    let config =
        TokenCollectorConfig::from_env().wrap_err("Failed to load token collector configuration")?;
    info!(
        channel = %config.channel,
        queue = %config.queue,
        batch_limit = config.collector.batch_limit,
        batch_timeout_ms = config.collector.batch_timeout.as_millis() as u64,
        healthcheck_interval_ms = config.collector.healthcheck_interval.as_millis() as u64,
        "Collector configuration loaded"
    );

    if let Some(addr) = config.metrics_addr {
        init_metrics(addr).wrap_err("Failed to start metrics exporter")?;
    }

    // Set up a shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!("Error waiting for shutdown signal: {}", e);
        }
        let _ = shutdown_tx.send(true);
    });

    let collector = BatchCollector::new(
        PgQueueConnector::from_config(&config),
        TokenEncoder::new(config.signing_key.clone()),
        BatchEmitter::stdout(),
        config.collector.clone(),
    );

    collector
        .run(shutdown_rx)
        .await
        .wrap_err("Token collector stopped with a fatal error")?;

    info!("Token collector stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        },
    }

    Ok(())
}

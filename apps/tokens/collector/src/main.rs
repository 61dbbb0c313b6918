//! Token Collector - Entry Point
//!
//! Batches queued account tokens and writes signed lines to stdout.

#[tokio::main(flavor = "current_thread")]
async fn main() -> eyre::Result<()> {
    token_collector::run().await
}

//! Queue workers binary entry point

use queue_workers::{Config, MemoryQueue, MemoryTxManager, TenantManager, WorkerPool};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    info!("Starting queue workers");

    // Load configuration
    let config = Config::default();
    config
        .validate()
        .map_err(|e| format!("Configuration error: {}", e))?;

    info!(
        "Initialized with {} workers, worker sleep {}ms, pool sleep {}ms",
        config.max_workers, config.worker_sleep_ms, config.pool_sleep_ms
    );

    // Wire the pool against the in-memory queue and metadata
    let queue = Arc::new(MemoryQueue::new());
    let tx_mgr = Arc::new(MemoryTxManager::new());
    let tenant_mgr = Arc::new(TenantManager::new());

    let mut pool = WorkerPool::new(&config, queue, tx_mgr, tenant_mgr);
    pool.start()
        .await
        .map_err(|e| format!("Failed to start worker pool: {}", e))?;

    // Wait for shutdown signal
    signal::ctrl_c().await?;
    info!("Shutdown signal received (SIGINT/SIGTERM)");

    pool.stop().await;
    info!("Queue workers shutdown complete");
    Ok(())
}

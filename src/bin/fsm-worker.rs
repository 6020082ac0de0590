//! # FSM Worker
//!
//! Runs the checklist, report and infra executors against their queues
//! until Ctrl+C or SIGTERM.

use anyhow::{Context, Result};
use fsm_worker::bootstrap::bootstrap;
use fsm_worker::config::ConfigLoader;
use fsm_worker::logging::init_structured_logging;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_structured_logging();

    let config = ConfigLoader::load().context("failed to load worker configuration")?;
    let worker = bootstrap(&config)
        .await
        .context("failed to start worker")?;

    info!("🔄 Worker running... Press Ctrl+C to shutdown gracefully");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Received Ctrl+C, initiating graceful shutdown...");
        }
        result = wait_for_sigterm() => {
            match result {
                Ok(()) => info!("🛑 Received SIGTERM, initiating graceful shutdown..."),
                Err(e) => warn!("⚠️  Error setting up SIGTERM handler: {}", e),
            }
        }
    }

    worker.stop().await;
    info!("✅ Worker shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_sigterm() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate())?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> Result<()> {
    std::future::pending::<()>().await;
    Ok(())
}

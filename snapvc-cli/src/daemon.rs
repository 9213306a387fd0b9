//! Foreground scheduled-backup daemon

use anyhow::{Context, Result};
use snapvc_core::VersionControl;
use snapvc_core::scheduler;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Run scheduled backups until Ctrl-C
pub async fn run(repo: Arc<VersionControl>, interval: Duration) -> Result<()> {
    let cancel = CancellationToken::new();
    let job = tokio::spawn(scheduler::run(repo.clone(), interval, cancel.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    cancel.cancel();
    job.await.context("Scheduled backup job panicked")?;
    repo.persist().await?;
    Ok(())
}

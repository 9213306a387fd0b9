//! Scheduled backups
//!
//! Runs [`VersionControl::run_scheduled_backups`] on a fixed interval using
//! `tokio::time::interval`, persisting after every pass that created a
//! backup.

use crate::repository::VersionControl;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Run the scheduled-backup loop until `cancel` is triggered.
///
/// The first pass runs immediately.
pub async fn run(repo: Arc<VersionControl>, interval: Duration, cancel: CancellationToken) {
    tracing::info!(
        interval_secs = interval.as_secs(),
        "Scheduled backup job started"
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Scheduled backup job stopping");
                break;
            }
            _ = ticker.tick() => {
                let created = repo.run_scheduled_backups().await;
                if created.is_empty() {
                    tracing::debug!("Scheduled backups: nothing to back up");
                    continue;
                }
                tracing::info!(count = created.len(), "Scheduled backups: created");
                if let Err(e) = repo.persist().await {
                    tracing::error!(error = %e, "Scheduled backups: failed to persist state");
                }
            }
        }
    }
}

use std::time::Duration;

use common::DlqConfig;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::consumers::failure_watcher::{FailureWatcher, PromotionOutcome, WatcherError};

/// Tally of one sweep over failed jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub promoted: usize,
    pub already_promoted: usize,
    pub failed: usize,
}

/// Periodically promote failed jobs whose notification was missed or whose
/// promotion failed (store outage, crash between insert and archive).
pub async fn run_promotion_sweep(
    watcher: FailureWatcher,
    config: DlqConfig,
    shutdown: CancellationToken,
) {
    let scan_interval = Duration::from_secs(config.sweep_interval_secs.max(1));

    info!(
        interval_secs = config.sweep_interval_secs,
        batch_size = config.sweep_batch_size,
        "Starting DLQ promotion sweep"
    );

    let mut interval = tokio::time::interval(scan_interval);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        match sweep_once(&watcher, config.sweep_batch_size).await {
            Ok(report) if report.promoted > 0 || report.failed > 0 => {
                info!(
                    scanned = report.scanned,
                    promoted = report.promoted,
                    already_promoted = report.already_promoted,
                    failed = report.failed,
                    "DLQ promotion sweep finished"
                );
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "DLQ promotion sweep failed"),
        }
    }
}

/// Promote up to `batch_size` exhausted `failed` jobs, oldest first.
pub async fn sweep_once(
    watcher: &FailureWatcher,
    batch_size: u64,
) -> Result<SweepReport, WatcherError> {
    let failures = watcher.queue().exhausted_failures(batch_size).await?;
    let mut report = SweepReport {
        scanned: failures.len(),
        ..Default::default()
    };

    for notification in failures {
        match watcher.promote(&notification).await {
            Ok(PromotionOutcome::Promoted { .. }) => report.promoted += 1,
            Ok(PromotionOutcome::AlreadyPromoted { .. }) => report.already_promoted += 1,
            Ok(_) => {}
            Err(e) => {
                error!(
                    job_id = %notification.job_id,
                    error = %e,
                    "Failed to promote job during sweep"
                );
                report.failed += 1;
            }
        }
    }

    Ok(report)
}

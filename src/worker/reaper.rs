use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::ActiveJobs;
use crate::ledger::{JobStatus, LedgerError};
use crate::queue::{JobQueue, QueueError};

/// Return RUNNING jobs not heard from in `stale_after` to PENDING and
/// release their queue claims. Jobs in `active` are still being worked on
/// by this process and are never reclaimed, however old their heartbeat.
/// Returns the number of jobs reclaimed.
pub async fn reclaim_stale(
    queue: &JobQueue,
    stale_after: Duration,
    active: &ActiveJobs,
) -> Result<usize, QueueError> {
    let reporter = queue.reporter();
    let now = Utc::now();
    let mut reclaimed = 0;

    for record in reporter.store().list_by_status(JobStatus::Running)? {
        if active.contains(&record.job_id) {
            continue;
        }
        let idle = (now - record.updated_at).to_std().unwrap_or_default();
        if idle < stale_after {
            continue;
        }

        match reporter.requeue_stale(&record.job_id) {
            Ok(_) => {}
            // Finished between the listing and now
            Err(LedgerError::InvalidTransition { .. }) => continue,
            Err(e) => return Err(e.into()),
        }
        queue.reclaim(record.queue_seq).await?;
        info!(
            job_id = %record.job_id,
            seq = record.queue_seq,
            idle_secs = idle.as_secs(),
            "Reclaimed stale job"
        );
        reclaimed += 1;
    }
    Ok(reclaimed)
}

/// Periodic reaper. The first pass runs immediately.
pub async fn run_reaper(
    queue: Arc<JobQueue>,
    active: ActiveJobs,
    stale_after: Duration,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(100)));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = reclaim_stale(&queue, stale_after, &active).await {
                    warn!(error = %e, "Reaper pass failed");
                }
            }
        }
    }
}

use std::sync::Mutex;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::error::{LedgerError, Result};
use super::models::{ErrorKind, JobEvent, JobRecord, JobStatus};
use super::store::FjallStore;

/// Single writer of job status.
///
/// Every mutation is a read-modify-write of one [`JobRecord`]; the internal
/// mutex serializes them so concurrent jobs never lose each other's updates.
/// Terminal transitions are exactly-once: repeating the recorded outcome is
/// a no-op returning `Ok(false)`, a conflicting one is rejected.
pub struct StatusReporter {
    store: FjallStore,
    write_lock: Mutex<()>,
}

impl StatusReporter {
    pub fn new(store: FjallStore) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &FjallStore {
        &self.store
    }

    pub fn get(&self, job_id: &str) -> Result<Option<JobRecord>> {
        self.store.get(job_id)
    }

    pub fn get_by_video(&self, video_id: &str) -> Result<Option<JobRecord>> {
        self.store.get_by_video(video_id)
    }

    pub fn events(&self, job_id: &str) -> Result<Vec<JobEvent>> {
        self.store.events(job_id)
    }

    /// Record a freshly enqueued job
    pub fn register(&self, record: &JobRecord) -> Result<()> {
        let _guard = self.lock();
        self.store.upsert(record)?;
        self.log(record, "enqueued")?;
        Ok(())
    }

    /// PENDING (or FAILED awaiting retry) -> RUNNING, counting one attempt
    pub fn mark_running(&self, job_id: &str, worker_id: &str) -> Result<JobRecord> {
        let _guard = self.lock();
        let mut record = self.load(job_id)?;

        if record.is_terminal() {
            return Err(LedgerError::AlreadyTerminal {
                job_id: job_id.to_string(),
                current: record.status,
                requested: JobStatus::Running,
            });
        }
        if !record.is_claimable() {
            return Err(LedgerError::InvalidTransition {
                job_id: job_id.to_string(),
                from: record.status,
                to: JobStatus::Running,
            });
        }

        record.status = JobStatus::Running;
        record.attempts += 1;
        record.progress = 0;
        record.error = None;
        record.error_kind = None;
        record.retry_scheduled = false;
        record.claimed_by = Some(worker_id.to_string());
        record.updated_at = Utc::now();
        self.store.upsert(&record)?;
        self.log(&record, &format!("claimed by {worker_id}"))?;

        info!(job_id, attempt = record.attempts, "Job running");
        Ok(record)
    }

    /// Progress never moves backwards while the job is running
    pub fn report_progress(&self, job_id: &str, progress: u8) -> Result<()> {
        let _guard = self.lock();
        let mut record = self.load(job_id)?;
        if record.status != JobStatus::Running {
            debug!(job_id, status = %record.status, "Ignoring progress for job not running");
            return Ok(());
        }

        let progress = progress.min(100);
        if progress > record.progress {
            record.progress = progress;
        }
        record.updated_at = Utc::now();
        self.store.upsert(&record)
    }

    /// Refresh `updated_at` so the reaper does not treat the job as stale
    pub fn heartbeat(&self, job_id: &str) -> Result<()> {
        let _guard = self.lock();
        let mut record = self.load(job_id)?;
        if record.status == JobStatus::Running {
            record.updated_at = Utc::now();
            self.store.upsert(&record)?;
        }
        Ok(())
    }

    pub fn mark_rendition_complete(&self, job_id: &str, rendition: &str) -> Result<()> {
        let _guard = self.lock();
        let mut record = self.load(job_id)?;
        if record.completed_renditions.iter().any(|r| r == rendition) {
            return Ok(());
        }
        record.completed_renditions.push(rendition.to_string());
        record.updated_at = Utc::now();
        self.store.upsert(&record)
    }

    /// RUNNING -> COMPLETED. Returns `false` if the job was already completed.
    pub fn complete(&self, job_id: &str, manifest_path: &str) -> Result<bool> {
        let _guard = self.lock();
        let mut record = self.load(job_id)?;

        match record.status {
            JobStatus::Completed => {
                if record.manifest_path.as_deref() == Some(manifest_path) {
                    debug!(job_id, "Job already completed");
                    return Ok(false);
                }
                return Err(LedgerError::AlreadyTerminal {
                    job_id: job_id.to_string(),
                    current: record.status,
                    requested: JobStatus::Completed,
                });
            }
            JobStatus::Failed if !record.retry_scheduled => {
                return Err(LedgerError::AlreadyTerminal {
                    job_id: job_id.to_string(),
                    current: record.status,
                    requested: JobStatus::Completed,
                });
            }
            JobStatus::Running => {}
            other => {
                return Err(LedgerError::InvalidTransition {
                    job_id: job_id.to_string(),
                    from: other,
                    to: JobStatus::Completed,
                });
            }
        }

        record.status = JobStatus::Completed;
        record.progress = 100;
        record.manifest_path = Some(manifest_path.to_string());
        record.error = None;
        record.error_kind = None;
        record.claimed_by = None;
        record.updated_at = Utc::now();
        self.store.upsert(&record)?;
        self.log(&record, &format!("completed: {manifest_path}"))?;

        info!(job_id, manifest_path, "Job completed");
        Ok(true)
    }

    /// RUNNING -> FAILED.
    ///
    /// With `retry_scheduled` the record stays claimable for the next attempt.
    /// Returns `false` if the same terminal failure was already recorded.
    pub fn fail(
        &self,
        job_id: &str,
        kind: ErrorKind,
        message: &str,
        retry_scheduled: bool,
    ) -> Result<bool> {
        let _guard = self.lock();
        let mut record = self.load(job_id)?;

        match record.status {
            JobStatus::Completed => {
                return Err(LedgerError::AlreadyTerminal {
                    job_id: job_id.to_string(),
                    current: record.status,
                    requested: JobStatus::Failed,
                });
            }
            JobStatus::Failed if !record.retry_scheduled => {
                if record.error_kind == Some(kind) {
                    debug!(job_id, "Job already failed");
                    return Ok(false);
                }
                return Err(LedgerError::AlreadyTerminal {
                    job_id: job_id.to_string(),
                    current: record.status,
                    requested: JobStatus::Failed,
                });
            }
            _ => {}
        }

        record.status = JobStatus::Failed;
        record.error = Some(message.to_string());
        record.error_kind = Some(kind);
        record.retry_scheduled = retry_scheduled;
        record.claimed_by = None;
        record.updated_at = Utc::now();
        self.store.upsert(&record)?;
        self.log(&record, &format!("{}: {}", kind.code(), message))?;

        if retry_scheduled {
            warn!(job_id, attempt = record.attempts, error = message, "Job failed, retry scheduled");
        } else {
            warn!(job_id, attempt = record.attempts, error = message, "Job failed");
        }
        Ok(true)
    }

    /// RUNNING -> PENDING for a job whose worker went away
    pub fn requeue_stale(&self, job_id: &str) -> Result<JobRecord> {
        let _guard = self.lock();
        let mut record = self.load(job_id)?;
        if record.status != JobStatus::Running {
            return Err(LedgerError::InvalidTransition {
                job_id: job_id.to_string(),
                from: record.status,
                to: JobStatus::Pending,
            });
        }

        let previous = record.claimed_by.take().unwrap_or_default();
        record.status = JobStatus::Pending;
        record.updated_at = Utc::now();
        self.store.upsert(&record)?;
        self.log(&record, &format!("reclaimed from {previous}"))?;
        Ok(record)
    }

    fn load(&self, job_id: &str) -> Result<JobRecord> {
        self.store
            .get(job_id)?
            .ok_or_else(|| LedgerError::JobNotFound(job_id.to_string()))
    }

    fn log(&self, record: &JobRecord, message: &str) -> Result<()> {
        let event = JobEvent {
            status: record.status,
            progress: record.progress,
            attempt: record.attempts,
            message: message.to_string(),
            timestamp: Utc::now(),
        };
        self.store.append_event(&record.job_id, &event)?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        // The guarded value is `()`, so a poisoned lock carries no broken state
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

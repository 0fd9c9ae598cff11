use crate::ledger::{JobRecord, StatusReporter};
use crate::proto::{DeadLetterTask, TranscodeTask};
use crate::queue::store::{FjallQueue, QueueError, Result, now_ms};
use crate::storage::layout::validate_component;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// What a collaborator submits to get a video transcoded
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    pub video_id: String,
    pub source_locator: String,
    #[serde(default)]
    pub category_partition: Option<String>,
}

/// A task claimed from the queue, with its sequence number
#[derive(Clone, Debug)]
pub struct ClaimedTask {
    pub seq: u64,
    pub task: TranscodeTask,
}

/// JobQueue joins the persistent task queue with the job ledger
///
/// Architecture:
/// 1. Collaborators call `submit(request)`
/// 2. The task is persisted to FjallQueue and the job registered as PENDING,
///    both under the queue write lock
/// 3. Consumers call `dequeue_next`, which claims the oldest due task or
///    waits for a submit notification / poll tick
///
/// Claims, acks and retries all go through the same write lock, which is the
/// only mutual exclusion between concurrent consumers.
pub struct JobQueue {
    queue: Arc<RwLock<FjallQueue>>,
    reporter: Arc<StatusReporter>,
    notify: Notify,
    poll_interval: Duration,
    max_attempts: u32,
}

impl JobQueue {
    pub fn new(
        queue: FjallQueue,
        reporter: Arc<StatusReporter>,
        poll_interval: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            queue: Arc::new(RwLock::new(queue)),
            reporter,
            notify: Notify::new(),
            poll_interval,
            max_attempts,
        }
    }

    pub fn reporter(&self) -> &Arc<StatusReporter> {
        &self.reporter
    }

    /// Enqueue a transcode job.
    ///
    /// While a job for the same video is still pending, running or awaiting a
    /// retry, that job is returned instead of creating a second one.
    pub async fn submit(&self, request: SubmitRequest) -> Result<JobRecord> {
        validate_component(&request.video_id, "video_id")
            .map_err(|e| QueueError::InvalidRequest(e.to_string()))?;
        if let Some(category) = &request.category_partition {
            validate_component(category, "category_partition")
                .map_err(|e| QueueError::InvalidRequest(e.to_string()))?;
        }
        if request.source_locator.trim().is_empty() {
            return Err(QueueError::InvalidRequest(
                "source_locator must not be empty".to_string(),
            ));
        }

        let queue = self.queue.write().await;

        if let Some(existing) = self.reporter.get_by_video(&request.video_id)? {
            if !existing.is_terminal() {
                debug!(
                    video_id = %request.video_id,
                    job_id = %existing.job_id,
                    "Job already in flight for video"
                );
                return Ok(existing);
            }
        }

        let task = TranscodeTask {
            job_id: Uuid::now_v7().to_string(),
            video_id: request.video_id,
            source_locator: request.source_locator,
            category_partition: request.category_partition,
            attempt: 0,
        };
        let seq = queue.enqueue(&task)?;

        let record = JobRecord::pending(
            task.job_id,
            task.video_id,
            task.source_locator,
            task.category_partition,
            seq,
            self.max_attempts,
        );
        self.reporter.register(&record)?;
        drop(queue);

        info!(seq, job_id = %record.job_id, video_id = %record.video_id, "Job submitted");
        self.notify.notify_one();
        Ok(record)
    }

    /// Claim the next due task, waiting until one appears.
    ///
    /// Returns `None` once `shutdown` is cancelled.
    pub async fn dequeue_next(
        &self,
        worker_id: &str,
        shutdown: &CancellationToken,
    ) -> Result<Option<ClaimedTask>> {
        loop {
            if shutdown.is_cancelled() {
                return Ok(None);
            }

            let claimed = {
                let queue = self.queue.write().await;
                queue.claim_next(worker_id, now_ms())?
            };
            if let Some((seq, task)) = claimed {
                return Ok(Some(ClaimedTask { seq, task }));
            }

            tokio::select! {
                _ = shutdown.cancelled() => return Ok(None),
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    pub async fn ack(&self, seq: u64) -> Result<()> {
        self.queue.write().await.ack(seq)
    }

    /// Put the task back with its attempt count, claimable after `delay`
    pub async fn retry_later(&self, claimed: &ClaimedTask, attempts: u32, delay: Duration) -> Result<()> {
        let mut task = claimed.task.clone();
        task.attempt = attempts;
        let due_ms = now_ms() + delay.as_millis() as u64;
        self.queue.write().await.retry_later(claimed.seq, &task, due_ms)
    }

    pub async fn dead_letter(&self, seq: u64, code: &str, message: &str, attempts: u32) -> Result<()> {
        self.queue
            .write()
            .await
            .move_to_dlq(seq, code.to_string(), message.to_string(), attempts)
    }

    /// Release `seq` if it is claimed; returns whether anything changed
    pub async fn reclaim(&self, seq: u64) -> Result<bool> {
        let released = self.queue.write().await.reclaim(seq)?;
        if released {
            self.notify.notify_one();
        }
        Ok(released)
    }

    /// Release claims left by a previous process; see [`FjallQueue::release_all_claims`]
    pub async fn recover_claims(&self) -> Result<usize> {
        let released = self.queue.write().await.release_all_claims()?;
        if !released.is_empty() {
            self.notify.notify_one();
        }
        Ok(released.len())
    }

    /// Most recent dead-lettered tasks, oldest first
    pub async fn dead_letters(&self, limit: usize) -> Result<Vec<(u64, DeadLetterTask)>> {
        self.queue.read().await.list_dlq(limit)
    }

    pub async fn claimed_len(&self) -> Result<usize> {
        self.queue.read().await.claimed_len()
    }

    pub async fn ready_len(&self) -> Result<usize> {
        self.queue.read().await.ready_len()
    }

    pub async fn flush(&self) -> Result<()> {
        self.queue.read().await.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{FjallStore, JobStatus};
    use tempfile::TempDir;

    fn setup() -> (JobQueue, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let queue = FjallQueue::open(temp_dir.path().join("queue")).unwrap();
        let store = FjallStore::open(temp_dir.path().join("ledger")).unwrap();
        let reporter = Arc::new(StatusReporter::new(store));
        let jobs = JobQueue::new(queue, reporter, Duration::from_millis(20), 3);
        (jobs, temp_dir)
    }

    fn request(video_id: &str) -> SubmitRequest {
        SubmitRequest {
            video_id: video_id.to_string(),
            source_locator: video_id.to_string(),
            category_partition: None,
        }
    }

    #[tokio::test]
    async fn test_submit_registers_pending_job() {
        let (jobs, _temp) = setup();
        let record = jobs.submit(request("v1")).await.unwrap();

        assert_eq!(record.status, JobStatus::Pending);
        assert_eq!(record.max_attempts, 3);
        let stored = jobs.reporter().get_by_video("v1").unwrap().unwrap();
        assert_eq!(stored.job_id, record.job_id);
        assert_eq!(jobs.ready_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_submit_is_idempotent_while_in_flight() {
        let (jobs, _temp) = setup();
        let first = jobs.submit(request("v1")).await.unwrap();
        let second = jobs.submit(request("v1")).await.unwrap();

        assert_eq!(first.job_id, second.job_id);
        assert_eq!(jobs.ready_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_submit_rejects_path_like_ids() {
        let (jobs, _temp) = setup();
        for bad in ["", "..", "a/b"] {
            assert!(matches!(
                jobs.submit(request(bad)).await,
                Err(QueueError::InvalidRequest(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_dequeue_returns_none_on_shutdown() {
        let (jobs, _temp) = setup();
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        assert!(jobs.dequeue_next("w1", &shutdown).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dequeue_wakes_on_submit() {
        let (jobs, _temp) = setup();
        let jobs = Arc::new(jobs);
        let shutdown = CancellationToken::new();

        let consumer = {
            let jobs = jobs.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { jobs.dequeue_next("w1", &shutdown).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        let record = jobs.submit(request("v1")).await.unwrap();

        let claimed = tokio::time::timeout(Duration::from_secs(2), consumer)
            .await
            .unwrap()
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(claimed.task.job_id, record.job_id);
        assert_eq!(claimed.seq, record.queue_seq);
    }

    #[tokio::test]
    async fn test_retry_later_hides_task_until_due() {
        let (jobs, _temp) = setup();
        jobs.submit(request("v1")).await.unwrap();
        let shutdown = CancellationToken::new();
        let claimed = jobs.dequeue_next("w1", &shutdown).await.unwrap().unwrap();

        jobs.retry_later(&claimed, 1, Duration::from_millis(150))
            .await
            .unwrap();

        let early = tokio::time::timeout(
            Duration::from_millis(50),
            jobs.dequeue_next("w1", &shutdown),
        )
        .await;
        assert!(early.is_err());

        let again = jobs.dequeue_next("w1", &shutdown).await.unwrap().unwrap();
        assert_eq!(again.seq, claimed.seq);
        assert_eq!(again.task.attempt, 1);
    }
}

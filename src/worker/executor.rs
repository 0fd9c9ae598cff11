//! Consumer loop: claims tasks and runs them under a job cap

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{JobRunner, PipelineError, RetryPolicy};
use crate::config::WorkerConfig;
use crate::ledger::{JobRecord, LedgerError};
use crate::observability::Metrics;
use crate::queue::{ClaimedTask, JobQueue};

/// Job ids this process is running right now.
///
/// An id is registered before its job turns RUNNING and removed when the
/// task finishes, including when it is aborted or panics.
#[derive(Clone, Debug, Default)]
pub struct ActiveJobs(Arc<Mutex<HashSet<String>>>);

impl ActiveJobs {
    pub fn contains(&self, job_id: &str) -> bool {
        self.lock().contains(job_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn enter(&self, job_id: &str) -> ActiveGuard {
        self.lock().insert(job_id.to_string());
        ActiveGuard {
            jobs: self.clone(),
            job_id: job_id.to_string(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) struct ActiveGuard {
    jobs: ActiveJobs,
    job_id: String,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.jobs.lock().remove(&self.job_id);
    }
}

/// Pulls jobs off the queue and runs at most `concurrency` of them at once.
///
/// A job permit is taken before dequeuing, so work beyond the cap stays in
/// the queue where other processes (or a restart) can pick it up.
pub struct Executor {
    queue: Arc<JobQueue>,
    runner: Arc<JobRunner>,
    policy: RetryPolicy,
    metrics: Arc<Metrics>,
    worker_id: String,
    active: ActiveJobs,
    concurrency: usize,
    heartbeat_interval: Duration,
    shutdown_grace: Duration,
}

impl Executor {
    pub fn new(
        queue: Arc<JobQueue>,
        runner: Arc<JobRunner>,
        policy: RetryPolicy,
        metrics: Arc<Metrics>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            queue,
            runner,
            policy,
            metrics,
            worker_id: format!("worker-{}", Uuid::now_v7()),
            active: ActiveJobs::default(),
            concurrency: config.concurrency.max(1),
            heartbeat_interval: config.heartbeat_interval(),
            shutdown_grace: config.shutdown_grace(),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Jobs in flight in this process; the reaper leaves these alone
    pub fn active_jobs(&self) -> &ActiveJobs {
        &self.active
    }

    /// Run until `shutdown` is cancelled, then drain in-flight jobs.
    ///
    /// Jobs still running after the grace period are aborted and left
    /// RUNNING with their claims held; startup recovery returns them to the
    /// queue.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut jobs = JoinSet::new();

        info!(worker_id = %self.worker_id, concurrency = self.concurrency, "Executor started");

        loop {
            while let Some(result) = jobs.try_join_next() {
                log_join(result);
            }

            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let claimed = match self.queue.dequeue_next(&self.worker_id, &shutdown).await {
                Ok(Some(claimed)) => claimed,
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "Dequeue failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => continue,
                    }
                }
            };

            let this = self.clone();
            jobs.spawn(async move {
                let _permit = permit;
                this.process(claimed).await;
            });
        }

        info!(in_flight = jobs.len(), "Executor stopping, draining jobs");
        let drained = tokio::time::timeout(self.shutdown_grace, async {
            while let Some(result) = jobs.join_next().await {
                log_join(result);
            }
        })
        .await;

        if drained.is_err() {
            warn!(abandoned = jobs.len(), "Shutdown grace elapsed, abandoning jobs");
            jobs.abort_all();
            while jobs.join_next().await.is_some() {}
        }

        if let Err(e) = self.queue.flush().await {
            warn!(error = %e, "Failed to flush queue");
        }
        info!("Executor stopped");
    }

    /// Run one claimed task and settle it in the ledger and the queue
    pub async fn process(&self, claimed: ClaimedTask) {
        let job_id = claimed.task.job_id.clone();
        let seq = claimed.seq;
        let reporter = self.queue.reporter();
        let _active = self.active.enter(&job_id);

        let record = match reporter.mark_running(&job_id, &self.worker_id) {
            Ok(record) => record,
            Err(LedgerError::AlreadyTerminal { current, .. }) => {
                info!(job_id, seq, status = %current, "Job already finished, dropping task");
                self.settle(self.queue.ack(seq).await, seq);
                return;
            }
            Err(LedgerError::JobNotFound(_)) => {
                warn!(job_id, seq, "Task has no job record");
                self.settle(
                    self.queue
                        .dead_letter(seq, "NOT_FOUND", "job record missing", claimed.task.attempt)
                        .await,
                    seq,
                );
                return;
            }
            Err(e) => {
                warn!(job_id, seq, error = %e, "Cannot start job, deferring");
                let delay = self.policy.backoff(claimed.task.attempt.max(1));
                self.settle(
                    self.queue
                        .retry_later(&claimed, claimed.task.attempt, delay)
                        .await,
                    seq,
                );
                return;
            }
        };

        self.metrics.job_started();
        info!(job_id, video_id = %record.video_id, attempt = record.attempts, seq, "Job started");

        let result = self.run_with_heartbeat(&record).await;

        match result {
            Ok(manifest_path) => match reporter.complete(&job_id, &manifest_path) {
                Ok(_) => {
                    self.metrics.job_completed();
                    self.settle(self.queue.ack(seq).await, seq);
                }
                Err(LedgerError::AlreadyTerminal { current, .. }) => {
                    warn!(job_id, status = %current, "Job finished elsewhere, dropping task");
                    self.settle(self.queue.ack(seq).await, seq);
                }
                Err(e) => {
                    // Claim stays held; the job is RUNNING with no heartbeat,
                    // so the reaper requeues it and the retry reuses renditions
                    error!(job_id, seq, error = %e, "Failed to record completion, keeping task claimed");
                }
            },
            Err(err) => self.handle_failure(&claimed, &record, err).await,
        }
    }

    async fn run_with_heartbeat(&self, record: &JobRecord) -> Result<String, PipelineError> {
        let reporter = self.queue.reporter();
        let run = self.runner.run(record);
        tokio::pin!(run);

        let mut ticker = tokio::time::interval(self.heartbeat_interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                result = &mut run => return result,
                _ = ticker.tick() => {
                    if let Err(e) = reporter.heartbeat(&record.job_id) {
                        warn!(job_id = %record.job_id, error = %e, "Heartbeat failed");
                    }
                }
            }
        }
    }

    async fn handle_failure(&self, claimed: &ClaimedTask, record: &JobRecord, err: PipelineError) {
        let job_id = record.job_id.as_str();
        let kind = err.kind();
        let message = err.to_string();
        let retry = err.is_retryable()
            && self.policy.should_retry(record.attempts)
            && record.attempts < record.max_attempts;

        if let Err(e) = self.queue.reporter().fail(job_id, kind, &message, retry) {
            error!(job_id, error = %e, "Failed to record failure");
        }

        if retry {
            let delay = self.policy.backoff(record.attempts);
            info!(job_id, attempt = record.attempts, delay_ms = delay.as_millis() as u64, code = kind.code(), "Retrying job");
            self.metrics.job_retried();
            self.settle(
                self.queue.retry_later(claimed, record.attempts, delay).await,
                claimed.seq,
            );
        } else {
            error!(job_id, attempt = record.attempts, code = kind.code(), error = %message, "Job failed permanently");
            self.metrics.job_failed();
            self.settle(
                self.queue
                    .dead_letter(claimed.seq, kind.code(), &message, record.attempts)
                    .await,
                claimed.seq,
            );
        }
    }

    fn settle(&self, result: crate::queue::store::Result<()>, seq: u64) {
        if let Err(e) = result {
            error!(seq, error = %e, "Failed to settle task in queue");
        }
    }
}

fn log_join(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!(error = %e, "Job task panicked");
        }
    }
}

//! Process wiring: configuration in, running worker out

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::api::{self, AppState};
use crate::config::{Config, ConfigError};
use crate::encoder::{EncodeError, Encoder, EncodingDriver, FfmpegEncoder};
use crate::ledger::{FjallStore, LedgerError, StatusReporter};
use crate::observability::Metrics;
use crate::queue::{FjallQueue, JobQueue, QueueError};
use crate::storage::{Storage, StorageError};
use crate::worker::{Executor, JobRunner, RetryPolicy, reclaim_stale, run_reaper};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Encoder check failed: {0}")]
    Encoder(#[from] EncodeError),

    #[error("Storage setup failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Status server failed: {0}")]
    Server(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Open the persistent queue and job ledger named by the config
pub fn open_queue(config: &Config) -> Result<JobQueue, AppError> {
    let store = FjallStore::open(&config.worker.ledger_path)?;
    let queue = FjallQueue::open(&config.worker.queue_path)?;
    let reporter = Arc::new(StatusReporter::new(store));
    Ok(JobQueue::new(
        queue,
        reporter,
        config.worker.poll_interval(),
        config.retry.max_attempts,
    ))
}

/// A fully wired worker process
pub struct App {
    config: Config,
    queue: Arc<JobQueue>,
    executor: Arc<Executor>,
    metrics: Arc<Metrics>,
}

impl App {
    /// Wire the worker with the ffmpeg encoder and the configured storage
    /// backend. Fails if the encoder binary cannot be run.
    pub async fn build(config: Config) -> Result<Self, AppError> {
        let encoder = Arc::new(FfmpegEncoder::new(
            config.encoding.ffmpeg_path.clone(),
            config.encoding.preset.clone(),
        ));
        encoder.verify().await?;

        let storage = Storage::from_config(&config.storage, config.worker.temp_dir.clone())?;
        let queue = open_queue(&config)?;
        Ok(Self::from_parts(config, queue, storage, encoder))
    }

    /// Wire the worker from already-built collaborators
    pub fn from_parts(
        config: Config,
        queue: JobQueue,
        storage: Storage,
        encoder: Arc<dyn Encoder>,
    ) -> Self {
        let metrics = Arc::new(Metrics::new());
        let queue = Arc::new(queue);

        // One budget for every encoder invocation in the process
        let budget = Arc::new(Semaphore::new(config.worker.concurrency.max(1)));
        let driver = EncodingDriver::new(
            encoder,
            budget,
            config.encoding.segment_seconds,
            config.encoding.rendition_attempts,
            metrics.clone(),
        );
        let runner = Arc::new(JobRunner::new(
            storage,
            driver,
            queue.reporter().clone(),
            config.encoding.ladder.clone(),
            config.worker.temp_dir.clone(),
            metrics.clone(),
        ));
        let executor = Arc::new(Executor::new(
            queue.clone(),
            runner,
            RetryPolicy::from_config(&config.retry),
            metrics.clone(),
            &config.worker,
        ));

        Self {
            config,
            queue,
            executor,
            metrics,
        }
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Return work orphaned by a previous process to the queue.
    ///
    /// The keyspace is locked to one process, so every RUNNING job and every
    /// claim found at startup belongs to a worker that is gone.
    pub async fn recover(&self) -> Result<(), AppError> {
        let jobs =
            reclaim_stale(&self.queue, Duration::ZERO, self.executor.active_jobs()).await?;
        let claims = self.queue.recover_claims().await?;
        if jobs > 0 || claims > 0 {
            info!(jobs, claims, "Recovered orphaned work");
        }
        Ok(())
    }

    /// Run the executor, reaper and status server until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), AppError> {
        self.recover().await?;

        let reaper = tokio::spawn(run_reaper(
            self.queue.clone(),
            self.executor.active_jobs().clone(),
            self.config.worker.stale_after(),
            self.config.worker.reap_interval(),
            shutdown.clone(),
        ));

        let state = AppState::new(self.queue.clone(), self.metrics.clone());
        let server = {
            let shutdown = shutdown.clone();
            let address = self.config.server.bind_addr;
            tokio::spawn(async move {
                let result = api::run(address, state, shutdown.clone()).await;
                if result.is_err() {
                    shutdown.cancel();
                }
                result
            })
        };

        self.executor.clone().run(shutdown.clone()).await;

        // The executor only returns on shutdown; make sure the rest follows
        shutdown.cancel();
        if let Err(e) = reaper.await {
            error!(error = %e, "Reaper task failed");
        }
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(AppError::Server(e.to_string())),
            Err(e) => return Err(AppError::Server(e.to_string())),
        }

        self.queue.reporter().store().persist()?;
        info!("Worker stopped");
        Ok(())
    }
}

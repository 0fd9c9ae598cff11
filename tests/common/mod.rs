#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use hlsworker::app::App;
use hlsworker::config::Config;
use hlsworker::encoder::{EncodeError, Encoder, RenditionSpec, SegmentInfo};
use hlsworker::ledger::{FjallStore, JobRecord, JobStatus, StatusReporter};
use hlsworker::queue::{FjallQueue, JobQueue, SubmitRequest};
use hlsworker::storage::{RemoteStore, Storage, StorageLayout};

/// Encoder stand-in that writes placeholder files instead of running ffmpeg
#[derive(Default)]
pub struct FakeEncoder {
    /// Remaining scripted failures per rendition name
    failures: Mutex<HashMap<String, usize>>,
    calls: Mutex<Vec<String>>,
    delay: Duration,
    /// Ledger to sample while encoding, for concurrency assertions
    ledger: Option<FjallStore>,
    max_running: AtomicUsize,
}

impl FakeEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(self, rendition: &str, times: usize) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(rendition.to_string(), times);
        self
    }

    pub fn observing(mut self, ledger: FjallStore) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn calls_for(&self, rendition: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|name| *name == rendition)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Encoder for FakeEncoder {
    async fn encode(
        &self,
        _input: &Path,
        spec: &RenditionSpec,
        output: &Path,
        _segment_seconds: u32,
    ) -> Result<(), EncodeError> {
        self.calls.lock().unwrap().push(spec.name.clone());

        if let Some(ledger) = &self.ledger {
            let running = ledger.list_by_status(JobStatus::Running).unwrap().len();
            self.max_running.fetch_max(running, Ordering::SeqCst);
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let fail = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(&spec.name) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    true
                }
                _ => false,
            }
        };
        if fail {
            return Err(EncodeError::ProcessFailed {
                rendition: spec.name.clone(),
                status: "exit status: 1".to_string(),
                stderr: "scripted failure".to_string(),
            });
        }

        tokio::fs::write(output, format!("{}x{}", spec.width, spec.height)).await?;
        Ok(())
    }

    async fn segment(
        &self,
        _encoded: &Path,
        _spec: &RenditionSpec,
        out_dir: &Path,
        segment_seconds: u32,
    ) -> Result<Vec<SegmentInfo>, EncodeError> {
        let mut segments = Vec::new();
        for (index, duration) in [segment_seconds as f64, 1.5].into_iter().enumerate() {
            let file_name = format!("segment-{index:03}.ts");
            tokio::fs::write(out_dir.join(&file_name), b"ts").await?;
            segments.push(SegmentInfo {
                file_name,
                duration,
            });
        }
        Ok(segments)
    }
}

/// A worker wired over temp directories with a fake encoder
pub struct Harness {
    pub temp: TempDir,
    pub uploads: PathBuf,
    pub app: App,
    pub encoder: Arc<FakeEncoder>,
    pub remote: Option<RemoteStore>,
}

pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.storage.uploads_root = Some(root.join("uploads"));
    config.worker.temp_dir = root.join("tmp");
    config.worker.queue_path = root.join("queue");
    config.worker.ledger_path = root.join("ledger");
    config.worker.poll_interval_ms = 20;
    config.worker.shutdown_grace_secs = 5;
    config.encoding.rendition_attempts = 1;
    config.retry.base_backoff_ms = 10;
    config.retry.max_backoff_ms = 50;
    config
}

impl Harness {
    pub fn local(encoder: FakeEncoder) -> Self {
        Self::build(encoder, |_| {}, false)
    }

    pub fn with_config(encoder: FakeEncoder, tweak: impl FnOnce(&mut Config)) -> Self {
        Self::build(encoder, tweak, false)
    }

    pub fn remote(encoder: FakeEncoder) -> Self {
        Self::build(encoder, |_| {}, true)
    }

    fn build(encoder: FakeEncoder, tweak: impl FnOnce(&mut Config), remote: bool) -> Self {
        let temp = TempDir::new().unwrap();
        let mut config = test_config(temp.path());
        tweak(&mut config);

        let uploads = temp.path().join("uploads");
        std::fs::create_dir_all(&uploads).unwrap();

        let store = FjallStore::open(&config.worker.ledger_path).unwrap();
        let encoder = Arc::new(encoder.observing(store.clone()));
        let reporter = Arc::new(StatusReporter::new(store));
        let queue = JobQueue::new(
            FjallQueue::open(&config.worker.queue_path).unwrap(),
            reporter,
            config.worker.poll_interval(),
            config.retry.max_attempts,
        );

        let layout = StorageLayout::new(
            uploads.clone(),
            &config.storage.public_prefix,
            config.storage.category_partitioning,
        );
        let (storage, remote) = if remote {
            let remote = RemoteStore::in_memory();
            let storage = Storage::remote(layout, remote.clone(), config.worker.temp_dir.clone());
            (storage, Some(remote))
        } else {
            (Storage::local(layout, config.worker.temp_dir.clone()), None)
        };

        let app = App::from_parts(config, queue, storage, encoder.clone());
        Self {
            temp,
            uploads,
            app,
            encoder,
            remote,
        }
    }

    /// Drop a raw upload at `<uploads>/raw/<video_id>/original.mp4`
    pub fn add_raw(&self, video_id: &str) -> PathBuf {
        let dir = self.uploads.join("raw").join(video_id);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("original.mp4");
        std::fs::write(&path, b"not really a video").unwrap();
        path
    }

    pub async fn submit(&self, video_id: &str, source: &str) -> JobRecord {
        self.app
            .queue()
            .submit(SubmitRequest {
                video_id: video_id.to_string(),
                source_locator: source.to_string(),
                category_partition: None,
            })
            .await
            .unwrap()
    }

    pub fn record(&self, video_id: &str) -> JobRecord {
        self.app
            .queue()
            .reporter()
            .get_by_video(video_id)
            .unwrap()
            .unwrap()
    }

    /// Poll the ledger until the video's job reaches `status`
    pub async fn wait_for_status(&self, video_id: &str, status: JobStatus) {
        let wait = async {
            while self.record(video_id).status != status {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(10), wait)
            .await
            .unwrap_or_else(|_| panic!("{video_id} never reached {status}"));
    }

    /// Run the executor until every listed video's job is terminal
    pub async fn run_until_terminal(&self, video_ids: &[&str]) {
        let shutdown = CancellationToken::new();
        let executor = tokio::spawn(self.app.executor().clone().run(shutdown.clone()));

        let wait = async {
            loop {
                let done = video_ids.iter().all(|id| self.record(id).is_terminal());
                if done {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        };
        let finished = tokio::time::timeout(Duration::from_secs(20), wait).await;

        shutdown.cancel();
        executor.await.unwrap();
        assert!(finished.is_ok(), "jobs did not finish in time");
    }
}

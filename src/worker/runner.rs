//! Job runner: one job end to end

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, info, warn};

use super::PipelineError;
use crate::encoder::{EncodingDriver, Rendition, RenditionSpec};
use crate::ledger::{JobRecord, StatusReporter};
use crate::observability::Metrics;
use crate::storage::Storage;

const PROGRESS_RESOLVED: u8 = 10;
const PROGRESS_TRANSCODED: u8 = 70;
const PROGRESS_PACKAGED: u8 = 90;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Runs the stages of one job in order:
/// resolve source, prepare output, transcode, package, publish.
///
/// Each stage starts only after the previous one's outputs are on disk. The
/// runner reports progress but leaves terminal transitions to the executor.
pub struct JobRunner {
    storage: Storage,
    driver: EncodingDriver,
    reporter: Arc<StatusReporter>,
    ladder: Vec<RenditionSpec>,
    temp_dir: PathBuf,
    metrics: Arc<Metrics>,
}

impl JobRunner {
    pub fn new(
        storage: Storage,
        driver: EncodingDriver,
        reporter: Arc<StatusReporter>,
        ladder: Vec<RenditionSpec>,
        temp_dir: PathBuf,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            storage,
            driver,
            reporter,
            ladder,
            temp_dir,
            metrics,
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Run `record` and return the public manifest path on success.
    ///
    /// The job's scratch directory is removed whatever the outcome.
    pub async fn run(&self, record: &JobRecord) -> Result<String> {
        let work_dir = self.temp_dir.join("jobs").join(&record.job_id);
        tokio::fs::create_dir_all(&work_dir)
            .await
            .map_err(|e| PipelineError::TransientIo(e.to_string()))?;

        let result = self.execute(record, &work_dir).await;

        if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(job_id = %record.job_id, error = %e, "Failed to clean work dir");
            }
        }
        result
    }

    async fn execute(&self, record: &JobRecord, work_dir: &Path) -> Result<String> {
        let job_id = record.job_id.as_str();
        let video_id = record.video_id.as_str();
        let category = record.category_partition.as_deref();

        let source = self
            .storage
            .resolve_source(&record.source_locator, work_dir)
            .await?;
        info!(job_id, video_id, source = %source.path.display(), strategy = ?source.strategy, "Source resolved");
        self.reporter.report_progress(job_id, PROGRESS_RESOLVED)?;

        let out_dir = self.storage.ensure_output_location(video_id, category).await?;

        // Renditions packaged by an earlier attempt of this job are reused
        let mut ready = Vec::new();
        let mut pending = Vec::new();
        for spec in &self.ladder {
            let reusable = if record.completed_renditions.contains(&spec.name) {
                self.driver.load_packaged(spec, &out_dir).await
            } else {
                None
            };
            match reusable {
                Some(rendition) => {
                    debug!(job_id, rendition = %spec.name, "Reusing packaged rendition");
                    ready.push(rendition);
                }
                None => pending.push(spec.clone()),
            }
        }

        let total = self.ladder.len().max(1);
        let done = AtomicUsize::new(ready.len());
        let on_done = |spec: &RenditionSpec| {
            let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
            let span = (PROGRESS_TRANSCODED - PROGRESS_RESOLVED) as usize;
            let progress = PROGRESS_RESOLVED as usize + span * finished / total;
            debug!(job_id, rendition = %spec.name, progress, "Rendition transcoded");
            if let Err(e) = self.reporter.report_progress(job_id, progress as u8) {
                warn!(job_id, error = %e, "Failed to report progress");
            }
        };

        let outcome = self
            .driver
            .transcode(&source.path, &pending, work_dir, &on_done)
            .await;

        let packaged = self.driver.package_renditions(&outcome.encoded, &out_dir).await?;
        for rendition in &packaged {
            self.reporter.mark_rendition_complete(job_id, &rendition.name)?;
        }

        if let Some((spec, err)) = outcome.failed.into_iter().next() {
            warn!(job_id, rendition = %spec.name, error = %err, "Rendition failed, master withheld");
            return Err(err.into());
        }

        let renditions: Vec<Rendition> = ready.into_iter().chain(packaged).collect();
        self.reporter.report_progress(job_id, PROGRESS_PACKAGED)?;

        let manifest = self.driver.write_master(video_id, &renditions, &out_dir).await?;

        let published = self.storage.publish(&out_dir, video_id, category).await?;
        let uploaded = published.iter().filter(|o| !o.skipped).count() as u64;
        if self.storage.is_remote() {
            self.metrics.objects_uploaded(uploaded);
            info!(job_id, uploaded, total = published.len(), "Output published");
        }
        self.storage.discard_staging(&out_dir).await?;

        let manifest_path = self.storage.layout().manifest_public_path(video_id, category)?;
        debug!(job_id, local = %manifest.path.display(), manifest_path, "Job output ready");
        Ok(manifest_path)
    }
}

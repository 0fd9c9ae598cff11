/// Fjall-based job ledger: the status store the backend reads
///
/// Persists, per job:
///
/// - the job record (status, progress, error, attempts, manifest path)
/// - a `video_id -> job_id` index pointing at the latest job for a video
/// - an append-only event log of every status transition
///
/// [`StatusReporter`] is the only writer; everything else reads through
/// [`FjallStore`].
///
/// ## Usage
///
/// ```rust,ignore
/// use hlsworker::ledger::{FjallStore, StatusReporter};
///
/// let reporter = StatusReporter::new(FjallStore::open("data/ledger")?);
/// reporter.mark_running(&job_id, "worker-1")?;
/// reporter.complete(&job_id, "/uploads/hls/v1/master.m3u8")?;
/// ```

pub mod error;
pub mod models;
pub mod partitions;
pub mod reporter;
pub mod store;

pub use error::{LedgerError, Result};
pub use models::{ErrorKind, JobEvent, JobRecord, JobStatus};
pub use reporter::StatusReporter;
pub use store::{FjallStore, StoreStats};

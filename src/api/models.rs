//! Wire models for the worker's status server.
//!
//! `POST /jobs` accepts a [`SubmitRequest`](crate::queue::SubmitRequest):
//!
//! ```json
//! { "video_id": "abc", "source_locator": "/uploads/raw/abc/original.mp4", "category_partition": "music" }
//! ```
//!
//! `GET /videos/{video_id}` returns the latest [`JobView`] for the video.

use serde::{Deserialize, Serialize};

use crate::ledger::{JobEvent, JobRecord, JobStatus, StoreStats};
use crate::observability::MetricsSnapshot;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JobAcceptedResponse {
    pub job_id: String,
    pub video_id: String,
    pub status: JobStatus,
}

/// Collaborator-facing view of a job record
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JobView {
    pub job_id: String,
    pub video_id: String,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub retry_scheduled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_path: Option<String>,
    pub completed_renditions: Vec<String>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<JobRecord> for JobView {
    fn from(record: JobRecord) -> Self {
        Self {
            job_id: record.job_id,
            video_id: record.video_id,
            status: record.status,
            progress: record.progress,
            error: record.error,
            error_code: record.error_kind.map(|kind| kind.code().to_string()),
            attempts: record.attempts,
            max_attempts: record.max_attempts,
            retry_scheduled: record.retry_scheduled,
            manifest_path: record.manifest_path,
            completed_renditions: record.completed_renditions,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobEventsResponse {
    pub job_id: String,
    pub events: Vec<JobEvent>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub queue_ready: usize,
    pub jobs: StoreStats,
    pub metrics: MetricsSnapshot,
}

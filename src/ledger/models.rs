//! Job records persisted in the ledger.
//!
//! A [`JobRecord`] is what the backend reads back by `video_id`: status,
//! progress, error and, once the video is playable, the public manifest path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Failure classes recorded on failed jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotFound,
    TransientIo,
    Encoding,
    Configuration,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::TransientIo => "TRANSIENT_IO",
            ErrorKind::Encoding => "ENCODING",
            ErrorKind::Configuration => "CONFIGURATION",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct JobRecord {
    pub job_id: String,
    pub video_id: String,
    pub source_locator: String,
    pub category_partition: Option<String>,
    pub status: JobStatus,
    pub progress: u8,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub attempts: u32,
    pub max_attempts: u32,
    /// FAILED but already re-enqueued with backoff
    #[serde(default)]
    pub retry_scheduled: bool,
    pub queue_seq: u64,
    #[serde(default)]
    pub completed_renditions: Vec<String>,
    pub manifest_path: Option<String>,
    pub claimed_by: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn pending(
        job_id: String,
        video_id: String,
        source_locator: String,
        category_partition: Option<String>,
        queue_seq: u64,
        max_attempts: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            video_id,
            source_locator,
            category_partition,
            status: JobStatus::Pending,
            progress: 0,
            error: None,
            error_kind: None,
            attempts: 0,
            max_attempts,
            retry_scheduled: false,
            queue_seq,
            completed_renditions: Vec::new(),
            manifest_path: None,
            claimed_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// COMPLETED, or FAILED with no retry pending
    pub fn is_terminal(&self) -> bool {
        match self.status {
            JobStatus::Completed => true,
            JobStatus::Failed => !self.retry_scheduled,
            JobStatus::Pending | JobStatus::Running => false,
        }
    }

    pub fn is_claimable(&self) -> bool {
        match self.status {
            JobStatus::Pending => true,
            JobStatus::Failed => self.retry_scheduled,
            JobStatus::Running | JobStatus::Completed => false,
        }
    }
}

/// One entry of a job's status history
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JobEvent {
    pub status: JobStatus,
    pub progress: u8,
    pub attempt: u32,
    pub message: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> JobRecord {
        JobRecord::pending(
            "job-1".to_string(),
            "v1".to_string(),
            "v1".to_string(),
            None,
            0,
            3,
        )
    }

    #[test]
    fn test_failed_with_retry_is_not_terminal() {
        let mut job = record();
        job.status = JobStatus::Failed;
        job.retry_scheduled = true;
        assert!(!job.is_terminal());
        assert!(job.is_claimable());

        job.retry_scheduled = false;
        assert!(job.is_terminal());
        assert!(!job.is_claimable());
    }

    #[test]
    fn test_status_serializes_upper_case() {
        let json = serde_json::to_value(record()).unwrap();
        assert_eq!(json["status"], "PENDING");

        let kind = serde_json::to_value(ErrorKind::TransientIo).unwrap();
        assert_eq!(kind, "TRANSIENT_IO");
        assert_eq!(ErrorKind::TransientIo.code(), "TRANSIENT_IO");
    }
}

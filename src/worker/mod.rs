//! Transcode worker service
//!
//! - `runner` - one job end to end: resolve, transcode, package, publish
//! - `executor` - bounded consumer loop over the job queue
//! - `reaper` - returns stale RUNNING jobs to the queue
//! - `retry` - job-level backoff policy

pub mod executor;
pub mod reaper;
pub mod retry;
pub mod runner;

use thiserror::Error;

use crate::encoder::EncodeError;
use crate::ledger::{ErrorKind, LedgerError};
use crate::storage::StorageError;

pub use executor::{ActiveJobs, Executor};
pub use reaper::{reclaim_stale, run_reaper};
pub use retry::RetryPolicy;
pub use runner::JobRunner;

/// Why a job run failed, classified for the retry decision
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Source not found: {0}")]
    NotFound(String),

    #[error("Transient I/O failure: {0}")]
    TransientIo(String),

    #[error("Encoding failed for {rendition}: {message}")]
    Encoding { rendition: String, message: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::NotFound(_) => ErrorKind::NotFound,
            PipelineError::TransientIo(_) | PipelineError::Ledger(_) => ErrorKind::TransientIo,
            PipelineError::Encoding { .. } => ErrorKind::Encoding,
            PipelineError::Configuration(_) => ErrorKind::Configuration,
        }
    }

    /// NOT_FOUND and CONFIGURATION never get better by waiting
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TransientIo | ErrorKind::Encoding
        )
    }
}

impl From<StorageError> for PipelineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) | StorageError::InvalidComponent { .. } => {
                PipelineError::NotFound(err.to_string())
            }
            StorageError::MissingConfig(_) => PipelineError::Configuration(err.to_string()),
            StorageError::Io(_) | StorageError::ObjectStore(_) => {
                PipelineError::TransientIo(err.to_string())
            }
        }
    }
}

impl From<EncodeError> for PipelineError {
    fn from(err: EncodeError) -> Self {
        match err {
            EncodeError::Io(_) => PipelineError::TransientIo(err.to_string()),
            // Missing or non-executable binary; anything else (EAGAIN,
            // EMFILE) is the host being busy
            EncodeError::Spawn { ref source, .. }
                if matches!(
                    source.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
                ) =>
            {
                PipelineError::Configuration(err.to_string())
            }
            EncodeError::Spawn { .. } => PipelineError::TransientIo(err.to_string()),
            EncodeError::Unavailable { .. } => PipelineError::Configuration(err.to_string()),
            _ => PipelineError::Encoding {
                rendition: err.rendition().unwrap_or("all").to_string(),
                message: err.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_errors_are_classified() {
        let not_found: PipelineError = StorageError::NotFound("v1".to_string()).into();
        assert_eq!(not_found.kind(), ErrorKind::NotFound);
        assert!(!not_found.is_retryable());

        let io: PipelineError =
            StorageError::Io(std::io::Error::other("disk full")).into();
        assert_eq!(io.kind(), ErrorKind::TransientIo);
        assert!(io.is_retryable());

        let config: PipelineError = StorageError::MissingConfig("bucket".to_string()).into();
        assert_eq!(config.kind(), ErrorKind::Configuration);
        assert!(!config.is_retryable());
    }

    #[test]
    fn test_encode_errors_are_classified() {
        let failed: PipelineError = EncodeError::ProcessFailed {
            rendition: "720p".to_string(),
            status: "exit status: 1".to_string(),
            stderr: String::new(),
        }
        .into();
        assert_eq!(failed.kind(), ErrorKind::Encoding);
        assert!(failed.is_retryable());
        assert!(matches!(failed, PipelineError::Encoding { ref rendition, .. } if rendition == "720p"));

        let spawn: PipelineError = EncodeError::Spawn {
            program: "ffmpeg".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        }
        .into();
        assert_eq!(spawn.kind(), ErrorKind::Configuration);

        // EAGAIN from fork on a loaded host
        let busy: PipelineError = EncodeError::Spawn {
            program: "ffmpeg".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::WouldBlock),
        }
        .into();
        assert_eq!(busy.kind(), ErrorKind::TransientIo);
        assert!(busy.is_retryable());
    }
}

use super::models::{Config, StorageBackend};
use crate::storage::validate_component;
use std::collections::HashSet;
use thiserror::Error;

/// Smallest stale window; leaves room for four one-second heartbeats
pub const MIN_STALE_AFTER_SECS: u64 = 4;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("storage.uploads_root is required")]
    MissingUploadsRoot,

    #[error("Storage backend is remote but {field} is not set")]
    MissingRemoteSetting { field: &'static str },

    #[error("Storage backend is remote but missing credentials (S3_ACCESS_KEY / S3_SECRET_KEY)")]
    MissingS3Credentials,

    #[error("Invalid public prefix '{0}'")]
    InvalidPublicPrefix(String),

    #[error("worker.concurrency must be at least 1")]
    InvalidConcurrency,

    #[error("worker.stale_after_secs must be at least {min}, got {got}")]
    InvalidStaleAfter { min: u64, got: u64 },

    #[error("encoding.segment_seconds must be within 1..=60, got {0}")]
    InvalidSegmentSeconds(u32),

    #[error("encoding.rendition_attempts must be at least 1")]
    InvalidRenditionAttempts,

    #[error("encoding.ladder must contain at least one rendition")]
    EmptyLadder,

    #[error("Duplicate rendition name '{0}' in encoding.ladder")]
    DuplicateRendition(String),

    #[error("Rendition '{name}' has invalid dimensions {width}x{height} (must be positive and even)")]
    InvalidDimensions { name: String, width: u32, height: u32 },

    #[error("Rendition '{0}' has a zero video bitrate")]
    InvalidBitrate(String),

    #[error("Rendition name '{0}' is not a valid directory name")]
    InvalidRenditionName(String),

    #[error("retry.max_attempts must be at least 1")]
    InvalidMaxAttempts,

    #[error("retry.base_backoff_ms ({base}) exceeds retry.max_backoff_ms ({max})")]
    InvalidBackoff { base: u64, max: u64 },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_storage(config)?;
    validate_worker(config)?;
    validate_encoding(config)?;
    validate_retry(config)?;
    Ok(())
}

fn validate_storage(config: &Config) -> Result<(), ValidationError> {
    let storage = &config.storage;
    if storage.uploads_root.is_none() {
        return Err(ValidationError::MissingUploadsRoot);
    }

    let prefix = storage.public_prefix.trim_matches('/');
    if !prefix.is_empty() && prefix.split('/').any(|part| validate_component(part, "public_prefix").is_err()) {
        return Err(ValidationError::InvalidPublicPrefix(storage.public_prefix.clone()));
    }

    if storage.backend == StorageBackend::Remote {
        if storage.bucket.as_deref().is_none_or(str::is_empty) {
            return Err(ValidationError::MissingRemoteSetting { field: "storage.bucket" });
        }
        if storage.region.as_deref().is_none_or(str::is_empty) {
            return Err(ValidationError::MissingRemoteSetting { field: "storage.region" });
        }
        if storage.access_key.is_none() || storage.secret_key.is_none() {
            return Err(ValidationError::MissingS3Credentials);
        }
    }

    Ok(())
}

fn validate_worker(config: &Config) -> Result<(), ValidationError> {
    if config.worker.concurrency == 0 {
        return Err(ValidationError::InvalidConcurrency);
    }
    if config.worker.stale_after_secs < MIN_STALE_AFTER_SECS {
        return Err(ValidationError::InvalidStaleAfter {
            min: MIN_STALE_AFTER_SECS,
            got: config.worker.stale_after_secs,
        });
    }
    Ok(())
}

/// Segment length, attempts and the rendition ladder
fn validate_encoding(config: &Config) -> Result<(), ValidationError> {
    let encoding = &config.encoding;
    if !(1..=60).contains(&encoding.segment_seconds) {
        return Err(ValidationError::InvalidSegmentSeconds(encoding.segment_seconds));
    }
    if encoding.rendition_attempts == 0 {
        return Err(ValidationError::InvalidRenditionAttempts);
    }
    if encoding.ladder.is_empty() {
        return Err(ValidationError::EmptyLadder);
    }

    let mut seen = HashSet::new();
    for spec in &encoding.ladder {
        if validate_component(&spec.name, "rendition").is_err() {
            return Err(ValidationError::InvalidRenditionName(spec.name.clone()));
        }
        if !seen.insert(spec.name.as_str()) {
            return Err(ValidationError::DuplicateRendition(spec.name.clone()));
        }
        if spec.width == 0 || spec.height == 0 || spec.width % 2 != 0 || spec.height % 2 != 0 {
            return Err(ValidationError::InvalidDimensions {
                name: spec.name.clone(),
                width: spec.width,
                height: spec.height,
            });
        }
        if spec.video_bitrate.bps() == 0 {
            return Err(ValidationError::InvalidBitrate(spec.name.clone()));
        }
    }

    Ok(())
}

fn validate_retry(config: &Config) -> Result<(), ValidationError> {
    let retry = &config.retry;
    if retry.max_attempts == 0 {
        return Err(ValidationError::InvalidMaxAttempts);
    }
    if retry.base_backoff_ms > retry.max_backoff_ms {
        return Err(ValidationError::InvalidBackoff {
            base: retry.base_backoff_ms,
            max: retry.max_backoff_ms,
        });
    }
    Ok(())
}

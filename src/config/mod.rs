//! Configuration management for hlsworker
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use hlsworker::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Status server listening on: {}", config.server.bind_addr);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `HLSWORKER__<section>__<key>`
//!
//! Examples:
//! - `HLSWORKER__STORAGE__UPLOADS_ROOT=/srv/uploads`
//! - `HLSWORKER__WORKER__CONCURRENCY=4`
//! - `HLSWORKER__ENCODING__SEGMENT_SECONDS=4`
//!
//! S3 credentials are read only from `S3_ACCESS_KEY` / `S3_SECRET_KEY`
//! (or `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`).
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/hlsworker.toml`.
//! This can be overridden using the `HLSWORKER_CONFIG` environment variable
//! or the CLI `--config` flag.

mod models;
mod sources;
mod validation;

pub use models::{
    Config, EncodingConfig, RetryConfig, ServerConfig, StorageBackend, StorageConfig,
    WorkerConfig,
};
pub use validation::ValidationError;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),

    #[error("Failed to render configuration: {0}")]
    RenderError(#[from] toml::ser::Error),
}

impl Config {
    /// Load configuration from all sources (file + environment) and validate it
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(None, false)
    }

    /// Load from an explicit file (or the default location) and validate.
    ///
    /// With `autodetect_uploads_root`, a missing `storage.uploads_root` is
    /// filled in by probing the working directory. Development use only.
    pub fn load_with(path: Option<PathBuf>, autodetect_uploads_root: bool) -> Result<Self, ConfigError> {
        let mut config = sources::load(path)?;
        if autodetect_uploads_root && config.storage.uploads_root.is_none() {
            let base = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            if let Some(root) = crate::storage::dev::autodetect_uploads_root(&base) {
                tracing::warn!(root = %root.display(), "Using autodetected uploads root");
                config.storage.uploads_root = Some(root);
            }
        }
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path, without `.env` or secrets
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Effective configuration as TOML; secrets are never included
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(
            &config_path,
            r#"
[storage]
uploads_root = "/data/uploads"
        "#,
        )
        .unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.encoding.ladder.len(), 2);
        assert_eq!(config.worker.concurrency, 2);
    }

    #[test]
    fn test_validation_catches_missing_uploads_root() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(
            &config_path,
            r#"
[worker]
concurrency = 2
        "#,
        )
        .unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(ValidationError::MissingUploadsRoot)
        ));
    }

    #[test]
    fn test_remote_backend_without_bucket_fails_at_startup() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(
            &config_path,
            r#"
[storage]
backend = "remote"
uploads_root = "/data/uploads"
region = "us-east-1"
        "#,
        )
        .unwrap();

        assert!(matches!(
            Config::load_from_path(config_path).unwrap_err(),
            ConfigError::ValidationError(ValidationError::MissingRemoteSetting { .. })
        ));
    }

    #[test]
    fn test_to_toml_round_trips() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("rendered.toml");

        let mut config = Config::default();
        config.storage.uploads_root = Some(PathBuf::from("/data/uploads"));
        fs::write(&config_path, config.to_toml().unwrap()).unwrap();

        let reloaded = Config::load_from_path(config_path).unwrap();
        assert_eq!(reloaded.encoding.ladder, config.encoding.ladder);
        assert_eq!(reloaded.worker.concurrency, config.worker.concurrency);
    }
}

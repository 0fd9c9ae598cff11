use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "HLSWORKER_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/hlsworker.toml";
const ENV_PREFIX: &str = "HLSWORKER";
const ENV_SEPARATOR: &str = "__";

/// Path of the TOML file: `$HLSWORKER_CONFIG` or `config/hlsworker.toml`
pub fn default_path() -> PathBuf {
    env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load(config_path: Option<PathBuf>) -> Result<Config, ConfigError> {
    // Load .env file if it exists (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    let config_path = config_path.unwrap_or_else(default_path);
    let mut config = load_from_sources(config_path)?;
    load_secrets(&mut config);

    Ok(config)
}

/// Secrets are never stored in TOML files, only in environment
fn load_secrets(config: &mut Config) {
    if let Ok(access_key) = env::var("S3_ACCESS_KEY") {
        config.storage.access_key = Some(access_key);
    }
    if let Ok(secret_key) = env::var("S3_SECRET_KEY") {
        config.storage.secret_key = Some(secret_key);
    }

    // Alternative: AWS-style environment variable names
    if config.storage.access_key.is_none() {
        if let Ok(access_key) = env::var("AWS_ACCESS_KEY_ID") {
            config.storage.access_key = Some(access_key);
        }
    }
    if config.storage.secret_key.is_none() {
        if let Ok(secret_key) = env::var("AWS_SECRET_ACCESS_KEY") {
            config.storage.secret_key = Some(secret_key);
        }
    }
}

/// Load configuration from a specific path and environment
/// Useful for testing with custom config files
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // HLSWORKER__WORKER__CONCURRENCY -> worker.concurrency
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_only() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8090");
        assert!(config.storage.uploads_root.is_none());
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "127.0.0.1:9000"

[storage]
uploads_root = "/data/uploads"
category_partitioning = true

[worker]
concurrency = 4

[encoding]
segment_seconds = 4
ladder = ["360p@500kbps", "1280x720@2.5Mbps"]

[retry]
max_attempts = 5
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(
            config.storage.uploads_root.as_deref(),
            Some(std::path::Path::new("/data/uploads"))
        );
        assert!(config.storage.category_partitioning);
        assert_eq!(config.worker.concurrency, 4);
        assert_eq!(config.encoding.segment_seconds, 4);
        assert_eq!(config.encoding.ladder.len(), 2);
        assert_eq!(config.encoding.ladder[0].name, "360p");
        assert_eq!(config.encoding.ladder[1].video_bitrate.bps(), 2_500_000);
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn test_ladder_as_tables() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[storage]
uploads_root = "/data/uploads"

[[encoding.ladder]]
name = "low"
width = 640
height = 360
video_bitrate = "600k"
audio_bitrate = 96000

[[encoding.ladder]]
name = "high"
width = 1920
height = 1080
video_bitrate = "5M"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        let ladder = &config.encoding.ladder;
        assert_eq!(ladder.len(), 2);
        assert_eq!(ladder[0].name, "low");
        assert_eq!(ladder[0].audio_bitrate.bps(), 96_000);
        assert_eq!(ladder[1].resolution(), "1920x1080");
        assert_eq!(ladder[1].audio_bitrate.bps(), 128_000);
    }

    // Environment overrides are not exercised here: mutating the process
    // environment is unsafe under the parallel test runner.
}

use crate::encoder::RenditionSpec;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub encoding: EncodingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Status server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8090))
}

/// Where HLS output is made durable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Local,
    Remote,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Root of the `raw/` and `hls/` trees. Required.
    pub uploads_root: Option<PathBuf>,
    /// URL path prefix the backend serves the uploads root under
    #[serde(default = "default_public_prefix")]
    pub public_prefix: String,
    #[serde(default)]
    pub category_partitioning: bool,
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    #[serde(default)]
    pub allow_http: bool,
    /// S3 access key (loaded from environment, not from config file)
    #[serde(skip)]
    pub access_key: Option<String>,
    /// S3 secret key (loaded from environment, not from config file)
    #[serde(skip)]
    pub secret_key: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            uploads_root: None,
            public_prefix: default_public_prefix(),
            category_partitioning: false,
            bucket: None,
            region: None,
            endpoint: None,
            allow_http: false,
            access_key: None,
            secret_key: None,
        }
    }
}

fn default_public_prefix() -> String {
    "uploads".to_string()
}

/// Consumer loop configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    /// Jobs run at once; also the size of the encoder budget
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
    #[serde(default = "default_queue_path")]
    pub queue_path: PathBuf,
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    /// How often a running job refreshes its ledger record; a quarter of
    /// the stale window, at least one second
    pub fn heartbeat_interval(&self) -> Duration {
        (self.stale_after() / 4).max(Duration::from_secs(1))
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            temp_dir: default_temp_dir(),
            queue_path: default_queue_path(),
            ledger_path: default_ledger_path(),
            poll_interval_ms: default_poll_interval_ms(),
            stale_after_secs: default_stale_after_secs(),
            reap_interval_secs: default_reap_interval_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

fn default_concurrency() -> usize {
    2
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("data/tmp")
}

fn default_queue_path() -> PathBuf {
    PathBuf::from("data/queue")
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("data/ledger")
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_stale_after_secs() -> u64 {
    600
}

fn default_reap_interval_secs() -> u64 {
    60
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

/// Encoder invocation and rendition ladder
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EncodingConfig {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
    #[serde(default = "default_segment_seconds")]
    pub segment_seconds: u32,
    #[serde(default = "default_preset")]
    pub preset: String,
    /// Attempts per rendition before the job itself fails
    #[serde(default = "default_rendition_attempts")]
    pub rendition_attempts: u32,
    #[serde(default = "default_ladder")]
    pub ladder: Vec<RenditionSpec>,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            segment_seconds: default_segment_seconds(),
            preset: default_preset(),
            rendition_attempts: default_rendition_attempts(),
            ladder: default_ladder(),
        }
    }
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_segment_seconds() -> u32 {
    6
}

fn default_preset() -> String {
    "veryfast".to_string()
}

fn default_rendition_attempts() -> u32 {
    2
}

fn default_ladder() -> Vec<RenditionSpec> {
    RenditionSpec::default_ladder()
}

/// Job-level retry policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    2_000
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

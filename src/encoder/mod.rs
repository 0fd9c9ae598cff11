//! Encoding driver: renditions in, HLS out
//!
//! - `ladder` - rendition specs and their config forms
//! - `command` - ffmpeg argument builder
//! - `ffmpeg` - [`Encoder`] implementation spawning ffmpeg
//! - `hls` - media/master playlists built and parsed with `m3u8_rs`
//! - `driver` - concurrent transcoding under the encoder budget, packaging

pub mod command;
pub mod driver;
pub mod ffmpeg;
pub mod hls;
pub mod ladder;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

pub use driver::{
    EncodedRendition, EncodingDriver, MasterManifest, Rendition, TranscodeOutcome,
};
pub use ffmpeg::FfmpegEncoder;
pub use ladder::{RenditionSpec, VideoCodec};

pub const MASTER_PLAYLIST: &str = "master.m3u8";
pub const RENDITION_PLAYLIST: &str = "playlist.m3u8";
pub const SEGMENT_PATTERN: &str = "segment-%03d.ts";
pub const SEGMENT_LIST: &str = "segments.csv";

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("Encoder failed for rendition {rendition} ({status}): {stderr}")]
    ProcessFailed {
        rendition: String,
        status: String,
        stderr: String,
    },

    #[error("Encoder produced no output at {0}")]
    NoOutput(PathBuf),

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} is not a usable encoder: {reason}")]
    Unavailable { program: String, reason: String },

    #[error("Invalid segment list: {0}")]
    InvalidSegmentList(String),

    #[error("Rendition {rendition} is incomplete, missing {missing}")]
    IncompleteRendition { rendition: String, missing: PathBuf },

    #[error("No renditions to package")]
    NoRenditions,

    #[error("Encoder budget closed")]
    BudgetClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EncodeError {
    /// Rendition the error belongs to, if any
    pub fn rendition(&self) -> Option<&str> {
        match self {
            EncodeError::ProcessFailed { rendition, .. }
            | EncodeError::IncompleteRendition { rendition, .. } => Some(rendition),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, EncodeError>;

/// One segment written by [`Encoder::segment`]
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentInfo {
    pub file_name: String,
    pub duration: f64,
}

/// External encoder seam.
///
/// `encode` produces one rendition as a single file; `segment` cuts that file
/// into fixed-duration segments inside `out_dir` and reports them in order.
#[async_trait]
pub trait Encoder: Send + Sync {
    async fn encode(
        &self,
        input: &Path,
        spec: &RenditionSpec,
        output: &Path,
        segment_seconds: u32,
    ) -> Result<()>;

    async fn segment(
        &self,
        encoded: &Path,
        spec: &RenditionSpec,
        out_dir: &Path,
        segment_seconds: u32,
    ) -> Result<Vec<SegmentInfo>>;
}

//! [`Encoder`] backed by the ffmpeg binary.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::command::FfmpegCommand;
use super::ladder::RenditionSpec;
use super::{EncodeError, Encoder, Result, SEGMENT_LIST, SegmentInfo};

/// Bytes of stderr kept on failure
const STDERR_TAIL: usize = 2048;

#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    program: PathBuf,
    preset: String,
}

impl FfmpegEncoder {
    pub fn new(program: impl Into<PathBuf>, preset: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            preset: preset.into(),
        }
    }

    /// Run `<program> -version` and return its first line.
    ///
    /// Used at startup so a bad `encoding.ffmpeg_path` stops the process
    /// instead of failing every job.
    pub async fn verify(&self) -> Result<String> {
        let output = Command::new(&self.program)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| EncodeError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(EncodeError::Unavailable {
                program: self.program.display().to_string(),
                reason: format!("{} {}", output.status, stderr_tail(&output.stderr)),
            });
        }

        let version = String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();
        info!(program = %self.program.display(), version, "Encoder available");
        Ok(version)
    }

    async fn run(&self, cmd: &FfmpegCommand, rendition: &str) -> Result<()> {
        let args = cmd.build_args();
        debug!(rendition, "Running {} {}", self.program.display(), args.join(" "));

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| EncodeError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(EncodeError::ProcessFailed {
                rendition: rendition.to_string(),
                status: output.status.to_string(),
                stderr: stderr_tail(&output.stderr),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn encode(
        &self,
        input: &Path,
        spec: &RenditionSpec,
        output: &Path,
        segment_seconds: u32,
    ) -> Result<()> {
        let cmd = FfmpegCommand::encode_rendition(input, output, spec, &self.preset, segment_seconds);
        self.run(&cmd, &spec.name).await?;

        let written = tokio::fs::metadata(output)
            .await
            .map(|meta| meta.len())
            .unwrap_or(0);
        if written == 0 {
            return Err(EncodeError::NoOutput(output.to_path_buf()));
        }

        info!(rendition = %spec.name, bytes = written, "Rendition encoded");
        Ok(())
    }

    async fn segment(
        &self,
        encoded: &Path,
        spec: &RenditionSpec,
        out_dir: &Path,
        segment_seconds: u32,
    ) -> Result<Vec<SegmentInfo>> {
        let cmd = FfmpegCommand::segment(encoded, out_dir, segment_seconds);
        self.run(&cmd, &spec.name).await?;

        let list_path = out_dir.join(SEGMENT_LIST);
        let list = tokio::fs::read_to_string(&list_path).await?;
        let segments = parse_segment_list(&list)?;
        tokio::fs::remove_file(&list_path).await?;

        if segments.is_empty() {
            return Err(EncodeError::NoOutput(out_dir.to_path_buf()));
        }
        Ok(segments)
    }
}

/// Parse ffmpeg's CSV segment list: `name,start,end` per line
pub fn parse_segment_list(content: &str) -> Result<Vec<SegmentInfo>> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let invalid = || EncodeError::InvalidSegmentList(line.to_string());
            let mut fields = line.split(',');
            let name = fields.next().ok_or_else(invalid)?.trim();
            let start: f64 = fields
                .next()
                .and_then(|v| v.trim().parse().ok())
                .ok_or_else(invalid)?;
            let end: f64 = fields
                .next()
                .and_then(|v| v.trim().parse().ok())
                .ok_or_else(invalid)?;
            if name.is_empty() || end < start {
                return Err(invalid());
            }
            Ok(SegmentInfo {
                file_name: name.to_string(),
                duration: end - start,
            })
        })
        .collect()
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= STDERR_TAIL {
        return text.to_string();
    }
    let mut start = text.len() - STDERR_TAIL;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_segment_list() {
        let csv = "segment-000.ts,0.000000,6.006000\nsegment-001.ts,6.006000,12.012000\nsegment-002.ts,12.012000,14.500000\n";
        let segments = parse_segment_list(csv).unwrap();

        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].file_name, "segment-000.ts");
        assert!((segments[0].duration - 6.006).abs() < 1e-9);
        assert!((segments[2].duration - 2.488).abs() < 1e-9);
    }

    #[test]
    fn test_parse_segment_list_rejects_garbage() {
        assert!(parse_segment_list("segment-000.ts,abc,6").is_err());
        assert!(parse_segment_list("segment-000.ts,6").is_err());
        assert!(parse_segment_list("segment-000.ts,6,2").is_err());
        assert!(parse_segment_list("").unwrap().is_empty());
    }

    #[test]
    fn test_stderr_tail_keeps_end() {
        let long = "x".repeat(5000) + "fatal: moov atom not found";
        let tail = stderr_tail(long.as_bytes());
        assert_eq!(tail.len(), STDERR_TAIL);
        assert!(tail.ends_with("moov atom not found"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let encoder = FfmpegEncoder::new("/nonexistent/ffmpeg-binary", "veryfast");
        let spec: RenditionSpec = "480p@800k".parse().unwrap();
        let temp_dir = tempfile::TempDir::new().unwrap();

        let err = encoder
            .encode(
                Path::new("/in.mp4"),
                &spec,
                &temp_dir.path().join("out.ts"),
                6,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EncodeError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_verify_rejects_missing_or_failing_binary() {
        let missing = FfmpegEncoder::new("/nonexistent/ffmpeg-binary", "veryfast");
        assert!(matches!(
            missing.verify().await,
            Err(EncodeError::Spawn { .. })
        ));

        let failing = FfmpegEncoder::new("false", "veryfast");
        assert!(matches!(
            failing.verify().await,
            Err(EncodeError::Unavailable { .. })
        ));

        let ok = FfmpegEncoder::new("true", "veryfast");
        assert!(ok.verify().await.is_ok());
    }
}

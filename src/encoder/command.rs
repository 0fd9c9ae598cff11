//! FFmpeg command builder.

use std::path::{Path, PathBuf};

use super::ladder::RenditionSpec;
use super::{SEGMENT_LIST, SEGMENT_PATTERN};

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    input: PathBuf,
    output: PathBuf,
    /// Arguments placed before `-i`
    input_args: Vec<String>,
    /// Arguments placed after `-i`
    output_args: Vec<String>,
    overwrite: bool,
    log_level: String,
}

impl FfmpegCommand {
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    pub fn audio_bitrate(self, bitrate: impl Into<String>) -> Self {
        self.output_arg("-b:a").output_arg(bitrate)
    }

    pub fn format(self, format: impl Into<String>) -> Self {
        self.output_arg("-f").output_arg(format)
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Scale, encode and mux one rendition into an MPEG-TS file.
    ///
    /// Keyframes are forced on every segment boundary so the segment muxer
    /// can later cut without re-encoding.
    pub fn encode_rendition(
        input: &Path,
        output: &Path,
        spec: &RenditionSpec,
        preset: &str,
        segment_seconds: u32,
    ) -> Self {
        Self::new(input, output)
            .video_filter(format!(
                "scale={}:{}:force_original_aspect_ratio=decrease,pad={}:{}:(ow-iw)/2:(oh-ih)/2",
                spec.width, spec.height, spec.width, spec.height
            ))
            .video_codec(spec.codec.encoder())
            .preset(preset)
            .output_args([
                "-b:v".to_string(),
                spec.video_bitrate.to_ffmpeg_arg(),
                "-maxrate".to_string(),
                spec.video_bitrate.scaled(1.07).to_ffmpeg_arg(),
                "-bufsize".to_string(),
                spec.video_bitrate.scaled(1.5).to_ffmpeg_arg(),
                "-force_key_frames".to_string(),
                format!("expr:gte(t,n_forced*{})", segment_seconds),
                "-sc_threshold".to_string(),
                "0".to_string(),
            ])
            .audio_codec("aac")
            .audio_bitrate(spec.audio_bitrate.to_ffmpeg_arg())
            .output_args(["-ac", "2"])
            .format("mpegts")
    }

    /// Cut an encoded file into fixed-length segments in `out_dir`, writing a
    /// CSV segment list next to them.
    pub fn segment(encoded: &Path, out_dir: &Path, segment_seconds: u32) -> Self {
        Self::new(encoded, out_dir.join(SEGMENT_PATTERN))
            .output_args(["-c", "copy", "-map", "0"])
            .format("segment")
            .output_args([
                "-segment_time".to_string(),
                segment_seconds.to_string(),
                "-segment_format".to_string(),
                "mpegts".to_string(),
                "-segment_list".to_string(),
                out_dir.join(SEGMENT_LIST).to_string_lossy().to_string(),
                "-segment_list_type".to_string(),
                "csv".to_string(),
            ])
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-v".to_string());
        args.push(self.log_level.clone());
        args.push("-nostdin".to_string());

        args.extend(self.input_args.clone());

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        args.extend(self.output_args.clone());

        args.push(self.output.to_string_lossy().to_string());

        args
    }

    pub fn output(&self) -> &Path {
        &self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(args: &[String], flag: &str) -> Option<String> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1).cloned())
    }

    #[test]
    fn test_encode_rendition_args() {
        let spec: RenditionSpec = "480p@800kbps".parse().unwrap();
        let cmd = FfmpegCommand::encode_rendition(
            Path::new("/in/original.mp4"),
            Path::new("/work/480p.ts"),
            &spec,
            "veryfast",
            6,
        );
        let args = cmd.build_args();

        assert_eq!(args[0], "-y");
        assert_eq!(window(&args, "-i").as_deref(), Some("/in/original.mp4"));
        assert_eq!(window(&args, "-c:v").as_deref(), Some("libx264"));
        assert_eq!(window(&args, "-b:v").as_deref(), Some("800k"));
        assert_eq!(window(&args, "-maxrate").as_deref(), Some("856k"));
        assert_eq!(window(&args, "-bufsize").as_deref(), Some("1200k"));
        assert_eq!(window(&args, "-b:a").as_deref(), Some("128k"));
        assert_eq!(window(&args, "-f").as_deref(), Some("mpegts"));
        assert!(window(&args, "-vf").unwrap().starts_with("scale=854:480"));
        assert_eq!(args.last().map(String::as_str), Some("/work/480p.ts"));
    }

    #[test]
    fn test_segment_args() {
        let cmd = FfmpegCommand::segment(Path::new("/work/480p.ts"), Path::new("/out/480p"), 6);
        let args = cmd.build_args();

        assert_eq!(window(&args, "-c").as_deref(), Some("copy"));
        assert_eq!(window(&args, "-f").as_deref(), Some("segment"));
        assert_eq!(window(&args, "-segment_time").as_deref(), Some("6"));
        assert_eq!(
            window(&args, "-segment_list").as_deref(),
            Some("/out/480p/segments.csv")
        );
        assert_eq!(
            args.last().map(String::as_str),
            Some("/out/480p/segment-%03d.ts")
        );
    }
}

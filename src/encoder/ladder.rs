//! Rendition ladder: what each output variant looks like

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::humanize::{self, Bitrate};

#[derive(Debug, Error)]
pub enum LadderError {
    #[error("Invalid rendition '{0}', expected e.g. \"480p@800kbps\" or \"1280x720@2500k\"")]
    InvalidFormat(String),

    #[error("Invalid bitrate in rendition '{spec}': {source}")]
    InvalidBitrate {
        spec: String,
        source: humanize::ParseError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    H264,
    #[serde(alias = "hevc")]
    H265,
}

impl VideoCodec {
    /// ffmpeg encoder name
    pub fn encoder(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "libx264",
            VideoCodec::H265 => "libx265",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264",
            VideoCodec::H265 => "h265",
        }
    }
}

/// One target variant: size, bitrates and codec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RenditionRepr")]
pub struct RenditionSpec {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub video_bitrate: Bitrate,
    pub audio_bitrate: Bitrate,
    pub codec: VideoCodec,
}

const DEFAULT_AUDIO_BITRATE: Bitrate = Bitrate(128_000);

impl RenditionSpec {
    pub fn new(name: &str, width: u32, height: u32, video_bitrate: Bitrate) -> Self {
        Self {
            name: name.to_string(),
            width,
            height,
            video_bitrate,
            audio_bitrate: DEFAULT_AUDIO_BITRATE,
            codec: VideoCodec::H264,
        }
    }

    /// 480p at 800 kbps and 720p at 2.5 Mbps
    pub fn default_ladder() -> Vec<RenditionSpec> {
        vec![
            RenditionSpec::new("480p", 854, 480, Bitrate::from_kbps(800)),
            RenditionSpec::new("720p", 1280, 720, Bitrate::from_kbps(2500)),
        ]
    }

    /// `WIDTHxHEIGHT`
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    /// Peak bandwidth advertised in the master playlist, video plus audio
    pub fn bandwidth(&self) -> u64 {
        self.video_bitrate.bps() + self.audio_bitrate.bps()
    }
}

impl fmt::Display for RenditionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} @ {})",
            self.name,
            self.resolution(),
            self.video_bitrate
        )
    }
}

/// Width for a 16:9 frame of the given height, rounded to an even number
fn width_for_height(height: u32) -> u32 {
    let width = (height as f64 * 16.0 / 9.0).round() as u32;
    width + width % 2
}

impl FromStr for RenditionSpec {
    type Err = LadderError;

    /// `480p@800kbps` or `1280x720@2500k`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let spec = s.trim();
        let invalid = || LadderError::InvalidFormat(spec.to_string());

        let (size, rate) = spec.split_once('@').ok_or_else(invalid)?;
        let video_bitrate = rate
            .parse::<Bitrate>()
            .map_err(|source| LadderError::InvalidBitrate {
                spec: spec.to_string(),
                source,
            })?;

        let size = size.trim().to_ascii_lowercase();
        let (width, height) = if let Some(height) = size.strip_suffix('p') {
            let height: u32 = height.parse().map_err(|_| invalid())?;
            (width_for_height(height), height)
        } else {
            let (w, h) = size.split_once('x').ok_or_else(invalid)?;
            (
                w.parse().map_err(|_| invalid())?,
                h.parse().map_err(|_| invalid())?,
            )
        };

        Ok(RenditionSpec::new(
            &format!("{}p", height),
            width,
            height,
            video_bitrate,
        ))
    }
}

/// Config form: compact string or full table
#[derive(Deserialize)]
#[serde(untagged)]
enum RenditionRepr {
    Compact(String),
    Table {
        name: Option<String>,
        width: u32,
        height: u32,
        video_bitrate: Bitrate,
        audio_bitrate: Option<Bitrate>,
        #[serde(default)]
        codec: VideoCodec,
    },
}

impl TryFrom<RenditionRepr> for RenditionSpec {
    type Error = LadderError;

    fn try_from(repr: RenditionRepr) -> Result<Self, Self::Error> {
        match repr {
            RenditionRepr::Compact(spec) => spec.parse(),
            RenditionRepr::Table {
                name,
                width,
                height,
                video_bitrate,
                audio_bitrate,
                codec,
            } => Ok(RenditionSpec {
                name: name.unwrap_or_else(|| format!("{}p", height)),
                width,
                height,
                video_bitrate,
                audio_bitrate: audio_bitrate.unwrap_or(DEFAULT_AUDIO_BITRATE),
                codec,
            }),
        }
    }
}

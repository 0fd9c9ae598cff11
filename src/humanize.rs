//! Human-readable bitrate formatting and parsing utilities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid bitrate format: {0}")]
    InvalidFormat(String),

    #[error("Invalid number: {0}")]
    InvalidNumber(#[from] std::num::ParseFloatError),

    #[error("Invalid unit: {0}")]
    InvalidUnit(String),
}

/// Bitrate in bits per second.
///
/// Accepts plain integers (`800000`) and decimal SI suffixes with an optional
/// `bps` tail: `800k`, `800kbps`, `2.5M`, `2.5Mbps`. Suffixes are powers of
/// 1000, which is what HLS `BANDWIDTH` and ffmpeg `-b:v` expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Bitrate(pub u64);

impl Bitrate {
    pub fn from_kbps(kbps: u64) -> Self {
        Bitrate(kbps * 1000)
    }

    pub fn bps(&self) -> u64 {
        self.0
    }

    /// Value formatted for ffmpeg rate options (`800k`, `1234567`)
    pub fn to_ffmpeg_arg(&self) -> String {
        if self.0 % 1000 == 0 {
            format!("{}k", self.0 / 1000)
        } else {
            self.0.to_string()
        }
    }

    /// Scale by a ratio, used to derive `-maxrate`/`-bufsize` from the target
    pub fn scaled(&self, ratio: f64) -> Bitrate {
        Bitrate((self.0 as f64 * ratio).round() as u64)
    }

    pub fn to_human_readable(&self) -> String {
        const UNITS: &[(&str, u64)] = &[
            ("Gbps", 1_000_000_000),
            ("Mbps", 1_000_000),
            ("kbps", 1_000),
        ];

        for &(unit, divisor) in UNITS {
            if self.0 < divisor {
                continue;
            }
            let whole = self.0 / divisor;
            let remainder = self.0 % divisor;
            if remainder == 0 {
                return format!("{}{}", whole, unit);
            }
            if remainder % (divisor / 10) == 0 {
                return format!("{}.{}{}", whole, remainder / (divisor / 10), unit);
            }
        }

        format!("{}bps", self.0)
    }
}

impl<'de> Deserialize<'de> for Bitrate {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct BitrateVisitor;

        impl<'de> serde::de::Visitor<'de> for BitrateVisitor {
            type Value = Bitrate;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a bitrate as string (e.g., \"800k\", \"2.5Mbps\") or integer")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(Bitrate(v))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(Bitrate)
                    .map_err(|_| E::custom(format!("bitrate must not be negative: {}", v)))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                v.parse::<Bitrate>().map_err(serde::de::Error::custom)
            }
        }

        deserializer.deserialize_any(BitrateVisitor)
    }
}

impl FromStr for Bitrate {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();

        if let Ok(bits) = normalized.parse::<u64>() {
            return Ok(Bitrate(bits));
        }

        let body = normalized
            .strip_suffix("bps")
            .or_else(|| normalized.strip_suffix("b/s"))
            .unwrap_or(&normalized);

        let split = body
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(body.len());
        let (num_str, unit) = body.split_at(split);

        if num_str.is_empty() {
            return Err(ParseError::InvalidFormat(s.trim().to_string()));
        }

        let num: f64 = num_str.parse()?;

        let multiplier = match unit.trim() {
            "" => 1.0,
            "k" => 1_000.0,
            "m" => 1_000_000.0,
            "g" => 1_000_000_000.0,
            other => return Err(ParseError::InvalidUnit(other.to_string())),
        };

        Ok(Bitrate((num * multiplier).round() as u64))
    }
}

impl fmt::Display for Bitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_human_readable())
    }
}

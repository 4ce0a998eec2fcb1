//! Transcode configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default H.265 target bitrate (kbps) when a bitrate is required but unset
pub const DEFAULT_H265_BITRATE_KBPS: u32 = 2000;
/// Default AV1 target bitrate (kbps) when a bitrate is required but unset
pub const DEFAULT_AV1_BITRATE_KBPS: u32 = 1500;
/// Default H.265 CRF
pub const DEFAULT_H265_CRF: u8 = 28;
/// Default AV1 CRF
pub const DEFAULT_AV1_CRF: u8 = 35;
/// Highest CRF accepted (AV1 scale)
pub const MAX_CRF: u8 = 63;
/// Default audio bitrate (kbps)
pub const DEFAULT_AUDIO_BITRATE_KBPS: u32 = 96;
/// Audio encoder used for every re-encode
pub const AUDIO_ENCODER: &str = "libopus";
/// Container for merged and encoded output
pub const OUTPUT_CONTAINER: &str = "mkv";

/// Target video codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum VideoCodec {
    /// Copy the input as-is, no encoder is invoked
    #[default]
    None,
    H265,
    Av1,
}

impl VideoCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoCodec::None => "none",
            VideoCodec::H265 => "h265",
            VideoCodec::Av1 => "av1",
        }
    }

    /// FFmpeg encoder name.
    pub fn encoder(&self) -> Option<&'static str> {
        match self {
            VideoCodec::None => None,
            VideoCodec::H265 => Some("libx265"),
            VideoCodec::Av1 => Some("libsvtav1"),
        }
    }

    /// Encoder speed preset.
    pub fn preset(&self) -> Option<&'static str> {
        match self {
            VideoCodec::None => None,
            VideoCodec::H265 => Some("medium"),
            VideoCodec::Av1 => Some("8"),
        }
    }

    pub fn default_bitrate_kbps(&self) -> Option<u32> {
        match self {
            VideoCodec::None => None,
            VideoCodec::H265 => Some(DEFAULT_H265_BITRATE_KBPS),
            VideoCodec::Av1 => Some(DEFAULT_AV1_BITRATE_KBPS),
        }
    }

    pub fn default_crf(&self) -> Option<u8> {
        match self {
            VideoCodec::None => None,
            VideoCodec::H265 => Some(DEFAULT_H265_CRF),
            VideoCodec::Av1 => Some(DEFAULT_AV1_CRF),
        }
    }
}

impl FromStr for VideoCodec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "none" | "copy" => Ok(VideoCodec::None),
            "h265" | "hevc" | "x265" => Ok(VideoCodec::H265),
            "av1" | "svtav1" => Ok(VideoCodec::Av1),
            other => Err(format!("Unknown codec: {}", other)),
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rate control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum PassMode {
    /// Quality-driven (CRF), single encoder run
    #[default]
    OnePass,
    /// Bitrate-budget-driven, analysis pass then encode pass
    TwoPass,
}

impl FromStr for PassMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "1" | "1pass" | "1-pass" | "one_pass" | "crf" => Ok(PassMode::OnePass),
            "2" | "2pass" | "2-pass" | "two_pass" | "bitrate" => Ok(PassMode::TwoPass),
            other => Err(format!("Unknown pass mode: {}", other)),
        }
    }
}

/// Re-encode knobs. Unset values resolve to codec defaults at encode time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct TranscodeOptions {
    #[serde(default)]
    pub codec: VideoCodec,

    #[serde(default)]
    pub pass_mode: PassMode,

    /// Target video bitrate (kbps); required for 2-pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_bitrate_kbps: Option<u32>,

    /// Constant rate factor (0-63)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crf: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_bitrate_kbps: Option<u32>,

    /// Output frame rate override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<f64>,

    /// Downmix audio to two channels
    #[serde(default)]
    pub force_stereo: bool,
}

impl TranscodeOptions {
    /// Whether an encoder run is needed at all.
    pub fn requires_encode(&self) -> bool {
        self.codec != VideoCodec::None
    }

    /// Validate numeric ranges.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(crf) = self.crf {
            if crf > MAX_CRF {
                return Err(format!("CRF must be between 0 and {}", MAX_CRF));
            }
        }

        if let Some(fps) = self.frame_rate {
            if !fps.is_finite() || fps <= 0.0 {
                return Err("Frame rate must be a positive number".to_string());
            }
        }

        if self.audio_bitrate_kbps == Some(0) {
            return Err("Audio bitrate must be greater than zero".to_string());
        }

        Ok(())
    }
}

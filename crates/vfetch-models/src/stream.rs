//! Fetchable elementary streams reported by the extraction tool.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Elementary stream kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Video,
    Audio,
}

/// One fetchable stream for a URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StreamCandidate {
    /// Opaque format id from the extractor, unique within one response
    pub id: String,
    pub kind: StreamKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<f64>,
    /// Primary codec (video codec for video streams, audio codec otherwise)
    pub codec_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate_kbps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approx_size_bytes: Option<u64>,
    /// Audio and video already combined in this stream
    pub is_muxed: bool,
}

impl StreamCandidate {
    pub fn is_video(&self) -> bool {
        self.kind == StreamKind::Video
    }

    pub fn is_audio(&self) -> bool {
        self.kind == StreamKind::Audio
    }
}

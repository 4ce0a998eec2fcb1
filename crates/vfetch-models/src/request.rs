//! Validated parameter sets for pipeline stages.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::encoding::TranscodeOptions;
use crate::job::StageKind;

/// Download selected streams and mux them into one container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FetchMergeRequest {
    pub url: String,
    pub video_id: String,
    /// Empty or absent means "no explicit audio stream"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_id: Option<String>,
    /// The selected video stream already carries audio
    #[serde(default)]
    pub is_muxed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_name: Option<String>,
    /// Re-encode after merging when `codec != none`
    #[serde(default)]
    pub transcode: TranscodeOptions,
    #[serde(default)]
    pub publish: bool,
}

/// Stream an arbitrary URL to local storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DirectFetchRequest {
    pub url: String,
    #[serde(default)]
    pub publish: bool,
}

/// Re-encode a local media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TranscodeRequest {
    /// Input path, absolute or relative to the download directory
    pub input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_name: Option<String>,
    #[serde(default)]
    pub options: TranscodeOptions,
    #[serde(default)]
    pub publish: bool,
}

/// Upload a local file to the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PublishRequest {
    /// Path, absolute or relative to the download directory
    pub path: String,
}

/// One stage invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum StageRequest {
    FetchMerge(FetchMergeRequest),
    DirectFetch(DirectFetchRequest),
    Transcode(TranscodeRequest),
    Publish(PublishRequest),
}

impl StageRequest {
    pub fn kind(&self) -> StageKind {
        match self {
            StageRequest::FetchMerge(_) => StageKind::FetchMerge,
            StageRequest::DirectFetch(_) => StageKind::DirectFetch,
            StageRequest::Transcode(_) => StageKind::Transcode,
            StageRequest::Publish(_) => StageKind::Publish,
        }
    }

    /// Validate the request.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StageRequest::FetchMerge(req) => {
                validate_url(&req.url)?;
                if req.video_id.trim().is_empty() {
                    return Err("Video format id is required".to_string());
                }
                req.transcode.validate()
            }
            StageRequest::DirectFetch(req) => validate_url(&req.url),
            StageRequest::Transcode(req) => {
                if req.input.trim().is_empty() {
                    return Err("Input file is required".to_string());
                }
                req.options.validate()
            }
            StageRequest::Publish(req) => {
                if req.path.trim().is_empty() {
                    return Err("File path is required".to_string());
                }
                Ok(())
            }
        }
    }
}

fn validate_url(raw: &str) -> Result<(), String> {
    let parsed = url::Url::parse(raw.trim()).map_err(|e| format!("Invalid URL: {}", e))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("Unsupported URL scheme: {}", other)),
    }
}

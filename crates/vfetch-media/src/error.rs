//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while driving external tools.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("{0} not found")]
    ToolNotFound(String),

    /// A spawned tool exited with a non-zero status.
    #[error("{program} exited with code {}: {message}", exit_code.map(|c| c.to_string()).unwrap_or_else(|| "unknown".to_string()))]
    ExternalProcess {
        program: String,
        exit_code: Option<i32>,
        message: String,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Probe failed: {0}")]
    Probe(String),

    #[error("Expected output not found: {0}")]
    MissingOutput(String),

    #[error("Unsupported media file: {0}")]
    UnsupportedMedia(String),

    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl MediaError {
    /// Create an external process failure.
    pub fn external_process(
        program: impl Into<String>,
        exit_code: Option<i32>,
        message: impl Into<String>,
    ) -> Self {
        Self::ExternalProcess {
            program: program.into(),
            exit_code,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn probe(message: impl Into<String>) -> Self {
        Self::Probe(message.into())
    }

    pub fn missing_output(what: impl Into<String>) -> Self {
        Self::MissingOutput(what.into())
    }

    pub fn unsupported_media(what: impl Into<String>) -> Self {
        Self::UnsupportedMedia(what.into())
    }

    pub fn missing_parameter(name: impl Into<String>) -> Self {
        Self::MissingParameter(name.into())
    }

    /// Exit code of a failed external process, if this is one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            MediaError::ExternalProcess { exit_code, .. } => *exit_code,
            _ => None,
        }
    }
}

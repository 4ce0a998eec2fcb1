//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("{0}")]
    Media(#[from] vfetch_media::MediaError),

    #[error("Upload failed: {0}")]
    Storage(#[from] vfetch_storage::StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] vfetch_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Short machine-readable category, used as a metrics label.
    pub fn kind(&self) -> &'static str {
        use vfetch_media::MediaError;

        match self {
            WorkerError::InvalidRequest(_) => "invalid_request",
            WorkerError::ConfigError(_) => "config",
            WorkerError::Media(MediaError::ExternalProcess { .. }) => "external_process",
            WorkerError::Media(MediaError::Transport(_)) => "transport",
            WorkerError::Media(MediaError::Probe(_)) => "probe",
            WorkerError::Media(MediaError::MissingOutput(_)) => "missing_output",
            WorkerError::Media(MediaError::UnsupportedMedia(_)) => "unsupported_media",
            WorkerError::Media(MediaError::MissingParameter(_)) => "missing_parameter",
            WorkerError::Media(MediaError::Timeout(_)) => "timeout",
            WorkerError::Media(_) => "media",
            WorkerError::Storage(_) => "publish",
            WorkerError::Queue(_) => "queue",
            WorkerError::Io(_) => "io",
        }
    }
}

impl From<reqwest::Error> for WorkerError {
    fn from(e: reqwest::Error) -> Self {
        Self::Media(vfetch_media::MediaError::transport(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vfetch_media::MediaError;

    #[test]
    fn test_kind_follows_media_taxonomy() {
        let err: WorkerError = MediaError::external_process("ffmpeg", Some(1), "boom").into();
        assert_eq!(err.kind(), "external_process");
        assert_eq!(err.to_string(), "ffmpeg exited with code 1: boom");

        let err: WorkerError = MediaError::missing_parameter("bitrate").into();
        assert_eq!(err.kind(), "missing_parameter");

        let err: WorkerError = vfetch_storage::StorageError::publish("too large").into();
        assert_eq!(err.kind(), "publish");
        assert!(err.to_string().contains("too large"));
    }
}

//! Publish client implementation.

use std::path::Path;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};

/// Default upload endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://pixeldrain.com/api/file";
/// Default base for shareable links.
pub const DEFAULT_PUBLIC_BASE: &str = "https://pixeldrain.com/u";

/// Configuration for the publish client.
#[derive(Debug, Clone)]
pub struct PublishConfig {
    /// Multipart upload endpoint
    pub endpoint: String,
    /// Shareable URL prefix; the returned id is appended
    pub public_base: String,
    /// Bearer credential, sent only when set
    pub api_key: Option<String>,
    /// Whole-request timeout
    pub timeout: Duration,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            public_base: DEFAULT_PUBLIC_BASE.to_string(),
            api_key: None,
            timeout: Duration::from_secs(3600),
        }
    }
}

impl PublishConfig {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        let defaults = Self::default();
        let endpoint = std::env::var("PUBLISH_ENDPOINT").unwrap_or(defaults.endpoint);
        url::Url::parse(&endpoint)
            .map_err(|e| StorageError::config_error(format!("PUBLISH_ENDPOINT invalid: {}", e)))?;

        let timeout = match std::env::var("PUBLISH_TIMEOUT_SECS") {
            Ok(raw) => Duration::from_secs(raw.parse().map_err(|_| {
                StorageError::config_error("PUBLISH_TIMEOUT_SECS must be a number of seconds")
            })?),
            Err(_) => defaults.timeout,
        };

        Ok(Self {
            endpoint,
            public_base: std::env::var("PUBLISH_PUBLIC_BASE").unwrap_or(defaults.public_base),
            api_key: std::env::var("PUBLISH_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            timeout,
        })
    }
}

/// A successfully published file.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedFile {
    pub id: String,
    pub url: String,
}

/// Upload response body.
#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    success: bool,
    id: Option<String>,
    message: Option<String>,
    value: Option<String>,
}

/// Client for the remote file host.
#[derive(Clone)]
pub struct PublishClient {
    client: Client,
    config: PublishConfig,
}

impl PublishClient {
    /// Create a new client from configuration.
    pub fn new(config: PublishConfig) -> StorageResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StorageError::config_error(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Self::new(PublishConfig::from_env()?)
    }

    pub fn config(&self) -> &PublishConfig {
        &self.config
    }

    /// Shareable URL for a file id.
    pub fn public_url(&self, id: &str) -> String {
        format!("{}/{}", self.config.public_base.trim_end_matches('/'), id)
    }

    /// Upload a local file as multipart field `file`, streamed from disk.
    pub async fn upload_file(&self, path: impl AsRef<Path>) -> StorageResult<PublishedFile> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|_| StorageError::not_found(path.display().to_string()))?;
        let len = file.metadata().await?.len();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload.bin".to_string());

        debug!("Uploading {} ({} bytes) to {}", path.display(), len, self.config.endpoint);

        let part = Part::stream_with_length(Body::from(file), len)
            .file_name(filename)
            .mime_str("application/octet-stream")?;
        let form = Form::new().part("file", part);

        let mut request = self.client.post(&self.config.endpoint).multipart(form);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        let parsed: Option<UploadResponse> = serde_json::from_str(&body).ok();
        match parsed {
            Some(UploadResponse {
                success: true,
                id: Some(id),
                ..
            }) if status.is_success() && !id.is_empty() => {
                let url = self.public_url(&id);
                info!("Published {} as {}", path.display(), url);
                Ok(PublishedFile { id, url })
            }
            Some(resp) => {
                let message = resp
                    .message
                    .or(resp.value)
                    .unwrap_or_else(|| format!("upload rejected with status {}", status));
                warn!(status = %status, "Publish rejected: {}", message);
                Err(StorageError::publish(message))
            }
            None => {
                let snippet: String = body.chars().take(200).collect();
                warn!(status = %status, "Publish returned an unexpected body");
                Err(StorageError::publish(format!(
                    "unexpected response ({}): {}",
                    status, snippet
                )))
            }
        }
    }
}

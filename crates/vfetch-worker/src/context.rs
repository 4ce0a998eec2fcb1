//! Shared collaborators for every stage.

use std::path::PathBuf;

use tracing::info;
use vfetch_media::{FormatResolver, MediaProber, ProcessRunner};
use vfetch_storage::PublishClient;

use crate::config::PipelineConfig;
use crate::error::{WorkerError, WorkerResult};

/// Everything a stage needs, built once at startup and shared across jobs.
pub struct PipelineContext {
    pub config: PipelineConfig,
    pub runner: ProcessRunner,
    pub prober: MediaProber,
    pub resolver: FormatResolver,
    pub publisher: PublishClient,
    /// Client for direct fetches
    pub http: reqwest::Client,
    /// Usable cookie file, if any
    pub cookies: Option<PathBuf>,
}

impl PipelineContext {
    /// Create the context, the download directory and the cookie file.
    pub async fn new(config: PipelineConfig, publisher: PublishClient) -> WorkerResult<Self> {
        tokio::fs::create_dir_all(&config.download_dir)
            .await
            .map_err(|e| {
                WorkerError::config_error(format!(
                    "Cannot create download directory {}: {}",
                    config.download_dir.display(),
                    e
                ))
            })?;

        let cookies = config.prepare_cookies().await;
        if let Some(path) = &cookies {
            info!("Using cookie file {}", path.display());
        }

        let runner = match config.process_timeout_secs {
            Some(secs) => ProcessRunner::new().with_timeout(secs),
            None => ProcessRunner::new(),
        };

        let http = reqwest::Client::builder()
            .user_agent(concat!("vfetch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| WorkerError::config_error(e.to_string()))?;

        Ok(Self {
            prober: MediaProber::new(&config.tools.ffprobe),
            resolver: FormatResolver::new(&config.tools.ytdlp).with_cookies(cookies.clone()),
            runner,
            publisher,
            http,
            cookies,
            config,
        })
    }

    pub fn download_dir(&self) -> &std::path::Path {
        &self.config.download_dir
    }
}

//! Pipeline configuration.

use std::path::{Component, Path, PathBuf};

use tracing::{info, warn};
use vfetch_media::{usable_cookies_file, ToolPaths};
use vfetch_models::encoding::OUTPUT_CONTAINER;

use crate::error::{WorkerError, WorkerResult};

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Where every stage reads and writes files
    pub download_dir: PathBuf,
    /// External tool locations
    pub tools: ToolPaths,
    /// Credential file handed to the download agent when usable
    pub cookies_file: PathBuf,
    /// Raw cookie file content, written to `cookies_file` at startup
    pub cookies_content: Option<String>,
    /// Container the agent merges streams into
    pub merge_container: String,
    /// Kill external tools running longer than this
    pub process_timeout_secs: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("/tmp/downloads"),
            tools: ToolPaths::default(),
            cookies_file: PathBuf::from("/tmp/youtube_cookies.txt"),
            cookies_content: None,
            merge_container: OUTPUT_CONTAINER.to_string(),
            process_timeout_secs: None,
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            download_dir: std::env::var("DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.download_dir),
            tools: ToolPaths::from_env(),
            cookies_file: std::env::var("COOKIES_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.cookies_file),
            cookies_content: std::env::var("YOUTUBE_COOKIES_CONTENT")
                .ok()
                .filter(|c| !c.trim().is_empty()),
            merge_container: std::env::var("MERGE_CONTAINER")
                .ok()
                .filter(|c| !c.trim().is_empty())
                .unwrap_or(defaults.merge_container),
            process_timeout_secs: std::env::var("PROCESS_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|secs| *secs > 0),
        }
    }

    /// Resolve a user-supplied path against the download directory.
    ///
    /// Relative paths are joined onto `download_dir`. Parent components are
    /// rejected, as are absolute paths outside `download_dir`.
    pub fn resolve_path(&self, raw: &str) -> WorkerResult<PathBuf> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(WorkerError::invalid_request("File path is required"));
        }

        let candidate = Path::new(raw);
        if candidate
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(WorkerError::invalid_request(format!(
                "Path must not contain '..': {}",
                raw
            )));
        }

        if candidate.is_absolute() {
            if !candidate.starts_with(&self.download_dir) {
                return Err(WorkerError::invalid_request(format!(
                    "Path is outside the download directory: {}",
                    raw
                )));
            }
            return Ok(candidate.to_path_buf());
        }

        Ok(self.download_dir.join(candidate))
    }

    /// Materialize the cookie file from `cookies_content` if configured and
    /// return it if it is usable.
    pub async fn prepare_cookies(&self) -> Option<PathBuf> {
        if let Some(content) = &self.cookies_content {
            if let Some(parent) = self.cookies_file.parent() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    warn!("Cannot create cookie file directory: {}", e);
                }
            }
            match tokio::fs::write(&self.cookies_file, content).await {
                Ok(()) => info!("Wrote cookie file to {}", self.cookies_file.display()),
                Err(e) => warn!("Failed to write cookie file: {}", e),
            }
        }

        usable_cookies_file(&self.cookies_file).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(dir: &Path) -> PipelineConfig {
        PipelineConfig {
            download_dir: dir.to_path_buf(),
            cookies_file: dir.join("cookies.txt"),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.download_dir, PathBuf::from("/tmp/downloads"));
        assert_eq!(config.merge_container, "mkv");
        assert!(config.process_timeout_secs.is_none());
    }

    #[test]
    fn test_resolve_path() {
        let config = config_in(Path::new("/srv/downloads"));

        assert_eq!(
            config.resolve_path("clip.mp4").unwrap(),
            PathBuf::from("/srv/downloads/clip.mp4")
        );
        assert_eq!(
            config.resolve_path("/srv/downloads/sub/clip.mp4").unwrap(),
            PathBuf::from("/srv/downloads/sub/clip.mp4")
        );
        assert!(config.resolve_path("../etc/passwd").is_err());
        assert!(config.resolve_path("/etc/passwd").is_err());
        assert!(config.resolve_path("/srv/downloads/../x").is_err());
        assert!(config.resolve_path("  ").is_err());
    }

    #[tokio::test]
    async fn test_prepare_cookies_from_content() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(dir.path());
        assert_eq!(config.prepare_cookies().await, None);

        config.cookies_content = Some(
            "# Netscape HTTP Cookie File\n.youtube.com\tTRUE\t/\tTRUE\t0\tPREF\thl=en\n"
                .to_string(),
        );
        assert_eq!(config.prepare_cookies().await, Some(dir.path().join("cookies.txt")));
    }
}

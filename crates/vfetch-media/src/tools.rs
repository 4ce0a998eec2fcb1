//! Locations of the external tools.

use std::path::{Path, PathBuf};

use crate::error::{MediaError, MediaResult};

/// Paths (or bare names resolved via `PATH`) of the external programs.
#[derive(Debug, Clone)]
pub struct ToolPaths {
    /// Download agent
    pub ytdlp: PathBuf,
    /// Media encoder
    pub ffmpeg: PathBuf,
    /// Probing tool
    pub ffprobe: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ytdlp: PathBuf::from("yt-dlp"),
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

impl ToolPaths {
    /// Create from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ytdlp: std::env::var("YTDLP_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ytdlp),
            ffmpeg: std::env::var("FFMPEG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffmpeg),
            ffprobe: std::env::var("FFPROBE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffprobe),
        }
    }

    /// Check that every tool can be found.
    pub fn check_all(&self) -> MediaResult<()> {
        check_tool(&self.ytdlp)?;
        check_tool(&self.ffmpeg)?;
        check_tool(&self.ffprobe)?;
        Ok(())
    }
}

/// Resolve a tool to an executable path.
///
/// Bare names are looked up on `PATH`; paths are checked in place.
pub fn check_tool(program: &Path) -> MediaResult<PathBuf> {
    which::which(program).map_err(|_| MediaError::ToolNotFound(program.display().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_tool() {
        let err = check_tool(Path::new("/nonexistent/definitely-not-a-tool")).unwrap_err();
        assert!(matches!(err, MediaError::ToolNotFound(_)));
    }

    #[test]
    fn test_defaults_are_bare_names() {
        let tools = ToolPaths::default();
        assert_eq!(tools.ytdlp, PathBuf::from("yt-dlp"));
        assert_eq!(tools.ffprobe, PathBuf::from("ffprobe"));
    }
}

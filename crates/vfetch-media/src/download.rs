//! Download agent (yt-dlp) invocation.
//!
//! Builds selector strings and command lines for the fetch-and-merge stage,
//! and validates the optional cookies file passed to the agent.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::command::ToolCommand;

/// Minimum size for a valid cookies file (bytes).
/// A real Netscape cookies file is at least ~50 bytes.
const MIN_COOKIES_FILE_SIZE: u64 = 50;

/// Selector fallback when the chosen video stream carries no audio.
const BEST_AUDIO: &str = "bestaudio";

/// Build the stream selector for the agent's `-f` flag.
///
/// - explicit audio id: `video+audio`
/// - no audio id, muxed video: `video`
/// - no audio id, video only: `video+bestaudio`
pub fn format_selector(video_id: &str, audio_id: Option<&str>, is_muxed: bool) -> String {
    let video_id = video_id.trim();
    match audio_id.map(str::trim).filter(|a| !a.is_empty()) {
        Some(audio_id) => format!("{}+{}", video_id, audio_id),
        None if is_muxed => video_id.to_string(),
        None => format!("{}+{}", video_id, BEST_AUDIO),
    }
}

/// Builder for download agent commands.
#[derive(Debug, Clone)]
pub struct YtDlpCommand {
    url: String,
    selector: String,
    output_template: PathBuf,
    merge_format: Option<String>,
    cookies: Option<PathBuf>,
}

impl YtDlpCommand {
    pub fn new(url: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            selector: selector.into(),
            output_template: PathBuf::from("%(title)s.%(ext)s"),
            merge_format: None,
            cookies: None,
        }
    }

    /// Output path or template (`-o`).
    pub fn output(mut self, template: impl AsRef<Path>) -> Self {
        self.output_template = template.as_ref().to_path_buf();
        self
    }

    /// Container for merged streams (`--merge-output-format`).
    pub fn merge_into(mut self, container: impl Into<String>) -> Self {
        self.merge_format = Some(container.into());
        self
    }

    pub fn cookies(mut self, cookies: Option<PathBuf>) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "-f".to_string(),
            self.selector.clone(),
            "-o".to_string(),
            self.output_template.to_string_lossy().to_string(),
        ];

        if let Some(container) = &self.merge_format {
            args.push("--merge-output-format".to_string());
            args.push(container.clone());
        }

        // One progress update per line instead of carriage-return redraws
        args.push("--newline".to_string());
        args.push("--no-playlist".to_string());

        if let Some(cookies) = &self.cookies {
            args.push("--cookies".to_string());
            args.push(cookies.to_string_lossy().to_string());
        }

        args.push(self.url.clone());
        args
    }

    /// Bind to a concrete agent binary.
    pub fn to_tool_command(&self, ytdlp: impl AsRef<Path>) -> ToolCommand {
        ToolCommand::new(ytdlp).args(self.build_args())
    }
}

/// Validate that a cookies file appears to be in Netscape format.
///
/// Netscape cookies files either start with "# Netscape HTTP Cookie File"
/// or contain tab-separated lines with domain entries.
pub fn is_valid_netscape_cookies(content: &str) -> bool {
    if content.starts_with("# Netscape HTTP Cookie File")
        || content.starts_with("# HTTP Cookie File")
    {
        return true;
    }

    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .any(|line| line.split('\t').count() >= 6)
}

/// Return `path` if it holds a usable cookies file.
///
/// Returns `None` if the file doesn't exist, is too small or is not in
/// Netscape format.
pub async fn usable_cookies_file(path: impl AsRef<Path>) -> Option<PathBuf> {
    let path = path.as_ref();

    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(_) => {
            debug!("Cookies file not found at {}, skipping", path.display());
            return None;
        }
    };

    if metadata.len() < MIN_COOKIES_FILE_SIZE {
        debug!(
            "Cookies file {} is too small ({} bytes), skipping",
            path.display(),
            metadata.len()
        );
        return None;
    }

    match tokio::fs::read_to_string(path).await {
        Ok(content) if is_valid_netscape_cookies(&content) => Some(path.to_path_buf()),
        Ok(_) => {
            debug!(
                "Cookies file {} is not in valid Netscape format, skipping",
                path.display()
            );
            None
        }
        Err(e) => {
            warn!("Failed to read cookies file: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const COOKIES: &str = "# Netscape HTTP Cookie File\n\
        .youtube.com\tTRUE\t/\tTRUE\t0\tPREF\tf6=40000000&hl=en\n";

    #[test]
    fn test_format_selector() {
        assert_eq!(format_selector("137", Some("140"), false), "137+140");
        assert_eq!(format_selector("137", Some(""), true), "137");
        assert_eq!(format_selector("137", None, true), "137");
        assert_eq!(format_selector("137", None, false), "137+bestaudio");
        assert_eq!(format_selector(" 22 ", Some("  "), false), "22+bestaudio");
    }

    #[test]
    fn test_command_args() {
        let args = YtDlpCommand::new("https://x/watch?v=1", "137+140")
            .output("/tmp/downloads/.interim-abc-clip")
            .merge_into("mkv")
            .cookies(Some(PathBuf::from("/tmp/cookies.txt")))
            .build_args();

        assert_eq!(&args[..4], &["-f", "137+140", "-o", "/tmp/downloads/.interim-abc-clip"]);
        assert!(args.windows(2).any(|w| w == ["--merge-output-format", "mkv"]));
        assert!(args.windows(2).any(|w| w == ["--cookies", "/tmp/cookies.txt"]));
        assert!(args.contains(&"--newline".to_string()));
        assert_eq!(args.last().unwrap(), "https://x/watch?v=1");
    }

    #[test]
    fn test_command_without_cookies() {
        let args = YtDlpCommand::new("https://x/v", "18").build_args();
        assert!(!args.contains(&"--cookies".to_string()));
        assert!(!args.contains(&"--merge-output-format".to_string()));
    }

    #[test]
    fn test_netscape_validation() {
        assert!(is_valid_netscape_cookies(COOKIES));
        assert!(is_valid_netscape_cookies(
            ".example.com\tTRUE\t/\tFALSE\t0\tname\tvalue"
        ));
        assert!(!is_valid_netscape_cookies("{\"cookies\": []}"));
        assert!(!is_valid_netscape_cookies(""));
    }

    #[tokio::test]
    async fn test_usable_cookies_file() {
        let dir = TempDir::new().unwrap();

        let good = dir.path().join("good.txt");
        std::fs::write(&good, COOKIES).unwrap();
        assert_eq!(usable_cookies_file(&good).await, Some(good.clone()));

        let tiny = dir.path().join("tiny.txt");
        std::fs::write(&tiny, "# x").unwrap();
        assert_eq!(usable_cookies_file(&tiny).await, None);

        let json = dir.path().join("json.txt");
        std::fs::write(&json, format!("{{\"cookies\": \"{}\"}}", "x".repeat(80))).unwrap();
        assert_eq!(usable_cookies_file(&json).await, None);

        assert_eq!(usable_cookies_file(dir.path().join("missing")).await, None);
    }
}

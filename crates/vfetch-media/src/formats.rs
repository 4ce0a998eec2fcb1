//! Stream listing for a remote URL.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};
use vfetch_models::{
    human_size, output_filename, StreamCandidate, StreamKind, DEFAULT_FILENAME,
};

use crate::error::{MediaError, MediaResult};

/// Container extension appended to suggested names.
const SUGGESTED_EXTENSION: &str = "mkv";

/// Normalized result of one metadata query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedFormats {
    /// One human-readable line per reported format
    pub raw_listing: String,
    /// Sorted by height then frame rate, descending
    pub video: Vec<StreamCandidate>,
    /// Sorted by bitrate, descending
    pub audio: Vec<StreamCandidate>,
}

impl ResolvedFormats {
    /// Nothing usable was found.
    pub fn is_empty(&self) -> bool {
        self.video.is_empty() && self.audio.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct InfoJson {
    #[serde(default)]
    formats: Vec<RawFormat>,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    format_id: Option<String>,
    ext: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
    height: Option<u32>,
    fps: Option<f64>,
    tbr: Option<f64>,
    vbr: Option<f64>,
    abr: Option<f64>,
    filesize: Option<u64>,
    filesize_approx: Option<u64>,
}

/// `None` and the extractor's `"none"` marker both mean "absent".
fn codec(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty() && *c != "none")
}

impl RawFormat {
    fn into_candidate(self) -> Option<StreamCandidate> {
        let id = self.format_id.clone().filter(|id| !id.is_empty())?;
        let vcodec = codec(&self.vcodec).map(str::to_string);
        let acodec = codec(&self.acodec).map(str::to_string);
        let size = self.filesize.or(self.filesize_approx);

        match (vcodec, acodec) {
            (Some(v), audio) => Some(StreamCandidate {
                id,
                kind: StreamKind::Video,
                height: self.height,
                frame_rate: self.fps.filter(|f| *f > 0.0),
                codec_name: v,
                bitrate_kbps: self.vbr.or(self.tbr),
                approx_size_bytes: size,
                is_muxed: audio.is_some(),
            }),
            (None, Some(a)) => Some(StreamCandidate {
                id,
                kind: StreamKind::Audio,
                height: None,
                frame_rate: None,
                codec_name: a,
                bitrate_kbps: self.abr.or(self.tbr),
                approx_size_bytes: size,
                is_muxed: false,
            }),
            // Storyboards and other image-only formats
            (None, None) => None,
        }
    }

    fn listing_line(&self) -> String {
        let id = self.format_id.as_deref().unwrap_or("?");
        let ext = self.ext.as_deref().unwrap_or("?");
        let vcodec = codec(&self.vcodec).unwrap_or("none");
        let acodec = codec(&self.acodec).unwrap_or("none");
        let height = self
            .height
            .map(|h| format!("{}p", h))
            .unwrap_or_else(|| "audio".to_string());
        let fps = self
            .fps
            .map(|f| format!("{}fps", trim_float(f)))
            .unwrap_or_else(|| "-".to_string());
        let size = self
            .filesize
            .or(self.filesize_approx)
            .map(human_size)
            .unwrap_or_else(|| "unknown size".to_string());

        format!(
            "{} | {} | {} + {} | {} | {} | {}",
            id, ext, vcodec, acodec, height, fps, size
        )
    }
}

fn trim_float(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as u64)
    } else {
        format!("{:.2}", value)
    }
}

fn descending(a: Option<f64>, b: Option<f64>) -> Ordering {
    b.unwrap_or(0.0)
        .partial_cmp(&a.unwrap_or(0.0))
        .unwrap_or(Ordering::Equal)
}

/// Parse the extractor's `-J` document into sorted candidates.
pub fn parse_formats(json: &str) -> MediaResult<ResolvedFormats> {
    let info: InfoJson = serde_json::from_str(json)?;

    let mut lines = Vec::new();
    let mut video = Vec::new();
    let mut audio = Vec::new();

    for format in info.formats {
        let line = format.listing_line();
        if let Some(candidate) = format.into_candidate() {
            lines.push(line);
            match candidate.kind {
                StreamKind::Video => video.push(candidate),
                StreamKind::Audio => audio.push(candidate),
            }
        }
    }

    // Stable sorts keep extractor order among equal keys
    video.sort_by(|a: &StreamCandidate, b: &StreamCandidate| {
        b.height
            .unwrap_or(0)
            .cmp(&a.height.unwrap_or(0))
            .then_with(|| descending(a.frame_rate, b.frame_rate))
    });
    audio.sort_by(|a: &StreamCandidate, b: &StreamCandidate| {
        descending(a.bitrate_kbps, b.bitrate_kbps)
    });

    Ok(ResolvedFormats {
        raw_listing: lines.join("\n"),
        video,
        audio,
    })
}

/// Queries the download agent for stream metadata.
#[derive(Debug, Clone)]
pub struct FormatResolver {
    ytdlp: PathBuf,
    cookies: Option<PathBuf>,
}

impl FormatResolver {
    pub fn new(ytdlp: impl AsRef<Path>) -> Self {
        Self {
            ytdlp: ytdlp.as_ref().to_path_buf(),
            cookies: None,
        }
    }

    /// Pass a credential file to every query.
    pub fn with_cookies(mut self, cookies: Option<PathBuf>) -> Self {
        self.cookies = cookies;
        self
    }

    async fn query(&self, args: &[&str], url: &str) -> MediaResult<String> {
        let mut cmd = Command::new(&self.ytdlp);
        cmd.args(args);
        if let Some(cookies) = &self.cookies {
            cmd.arg("--cookies").arg(cookies);
        }
        let output = cmd
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = stderr.lines().last().unwrap_or("Unknown error").to_string();
            return Err(MediaError::external_process(
                "yt-dlp",
                output.status.code(),
                message,
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// List the streams available for `url`.
    ///
    /// Fails softly: any extraction error yields an empty result.
    pub async fn resolve(&self, url: &str) -> ResolvedFormats {
        let result = self
            .query(&["-J", "--no-playlist"], url)
            .await
            .and_then(|json| parse_formats(&json));

        match result {
            Ok(formats) => {
                info!(
                    url = %url,
                    video = formats.video.len(),
                    audio = formats.audio.len(),
                    "Resolved formats"
                );
                formats
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Format resolution failed");
                ResolvedFormats::default()
            }
        }
    }

    /// Sanitized remote title with the container extension, or
    /// [`DEFAULT_FILENAME`] on any failure.
    pub async fn suggested_filename(&self, url: &str) -> String {
        match self
            .query(&["--print", "title", "--no-playlist", "--skip-download"], url)
            .await
        {
            Ok(stdout) => {
                let title = stdout.lines().map(str::trim).find(|l| !l.is_empty());
                output_filename(title, SUGGESTED_EXTENSION, DEFAULT_FILENAME)
            }
            Err(e) => {
                debug!(url = %url, error = %e, "Title lookup failed, using default name");
                DEFAULT_FILENAME.to_string()
            }
        }
    }
}

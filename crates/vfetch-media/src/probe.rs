//! FFprobe metadata queries.
//!
//! `duration` and `audio_channel_count` never fail: they fall back to
//! defaults so a broken probe cannot stop an encode. `media_info` reports a
//! [`MediaError::Probe`] only when the tool cannot be run at all.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// Channel count assumed when the probe cannot tell.
pub const DEFAULT_AUDIO_CHANNELS: u32 = 2;

/// Stream summary for a local media file. Fields are absent when the
/// corresponding stream is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_fps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_bitrate_kbps: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_bitrate_kbps: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    bit_rate: Option<String>,
}

/// Read-only metadata queries against local files.
#[derive(Debug, Clone)]
pub struct MediaProber {
    ffprobe: PathBuf,
}

impl MediaProber {
    pub fn new(ffprobe: impl AsRef<Path>) -> Self {
        Self {
            ffprobe: ffprobe.as_ref().to_path_buf(),
        }
    }

    /// Run ffprobe and return stdout if it exited successfully.
    async fn query(&self, args: &[&str], path: &Path) -> MediaResult<Vec<u8>> {
        let output = Command::new(&self.ffprobe)
            .args(args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| MediaError::probe(format!("cannot run {}: {}", self.ffprobe.display(), e)))?;

        if !output.status.success() {
            return Err(MediaError::external_process(
                "ffprobe",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        Ok(output.stdout)
    }

    /// Container duration in seconds, `0.0` on any failure.
    pub async fn duration(&self, path: impl AsRef<Path>) -> f64 {
        let path = path.as_ref();
        let result = self
            .query(
                &["-v", "error", "-show_entries", "format=duration", "-of", "json"],
                path,
            )
            .await
            .and_then(|stdout| parse_duration(&stdout));

        match result {
            Ok(Some(duration)) => duration,
            Ok(None) => {
                debug!(path = %path.display(), "No duration reported, using 0");
                0.0
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Duration probe failed, using 0");
                0.0
            }
        }
    }

    /// Channel count of the first audio stream, `2` on any failure.
    pub async fn audio_channel_count(&self, path: impl AsRef<Path>) -> u32 {
        let path = path.as_ref();
        let result = self
            .query(
                &[
                    "-v",
                    "error",
                    "-select_streams",
                    "a:0",
                    "-show_entries",
                    "stream=channels",
                    "-of",
                    "csv=p=0",
                ],
                path,
            )
            .await;

        match result {
            Ok(stdout) => parse_channel_count(&stdout).unwrap_or(DEFAULT_AUDIO_CHANNELS),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Channel probe failed, assuming stereo");
                DEFAULT_AUDIO_CHANNELS
            }
        }
    }

    /// Stream summary. Unparsable or failing probes yield an empty summary;
    /// only a tool that cannot be spawned is an error.
    pub async fn media_info(&self, path: impl AsRef<Path>) -> MediaResult<MediaInfo> {
        let path = path.as_ref();
        let result = self
            .query(
                &[
                    "-v",
                    "quiet",
                    "-print_format",
                    "json",
                    "-show_format",
                    "-show_streams",
                ],
                path,
            )
            .await;

        match result {
            Ok(stdout) => Ok(parse_media_info(&stdout).unwrap_or_default()),
            Err(e @ MediaError::Probe(_)) => Err(e),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Media info probe failed");
                Ok(MediaInfo::default())
            }
        }
    }
}

fn parse_duration(stdout: &[u8]) -> MediaResult<Option<f64>> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)?;
    Ok(probe
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0))
}

fn parse_channel_count(stdout: &[u8]) -> Option<u32> {
    String::from_utf8_lossy(stdout)
        .lines()
        .find_map(|line| line.trim().trim_end_matches(',').parse::<u32>().ok())
        .filter(|c| *c > 0)
}

fn parse_media_info(stdout: &[u8]) -> MediaResult<MediaInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)?;

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    let audio = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"));

    let kbps = |s: &FfprobeStream| {
        s.bit_rate
            .as_deref()
            .and_then(|b| b.parse::<u64>().ok())
            .map(|b| b / 1000)
    };

    Ok(MediaInfo {
        video_codec: video.and_then(|v| v.codec_name.clone()),
        video_fps: video.and_then(|v| {
            v.avg_frame_rate
                .as_deref()
                .and_then(parse_frame_rate)
                .or_else(|| v.r_frame_rate.as_deref().and_then(parse_frame_rate))
        }),
        video_bitrate_kbps: video.and_then(kbps),
        audio_codec: audio.and_then(|a| a.codec_name.clone()),
        audio_bitrate_kbps: audio.and_then(kbps),
        duration_secs: probe
            .format
            .and_then(|f| f.duration)
            .and_then(|d| d.parse().ok()),
    })
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den > 0.0 && num > 0.0 {
            return Some(num / den);
        }
        return None;
    }
    s.parse().ok().filter(|f: &f64| *f > 0.0)
}

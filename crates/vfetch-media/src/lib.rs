#![deny(unreachable_patterns)]
//! External media tool wrappers for the vfetch backend.
//!
//! This crate provides:
//! - A process runner merging tool output into a line stream with progress extraction
//! - Type-safe FFmpeg and yt-dlp command building
//! - Progress parsing adapters for the download agent and the encoder
//! - FFprobe metadata queries with soft defaults
//! - Format listing and selector construction for remote URLs
//! - Encode planning for 1-pass and 2-pass transcodes

pub mod command;
pub mod download;
pub mod error;
pub mod formats;
pub mod fs_utils;
pub mod probe;
pub mod progress;
pub mod tools;
pub mod transcode;

pub use command::{FfmpegCommand, ProcessRunner, RunningProcess, ToolCommand};
pub use download::{format_selector, is_valid_netscape_cookies, usable_cookies_file, YtDlpCommand};
pub use error::{MediaError, MediaResult};
pub use formats::{parse_formats, FormatResolver, ResolvedFormats};
pub use fs_utils::{find_by_prefix, move_file, remove_by_prefix, remove_quietly};
pub use probe::{MediaInfo, MediaProber};
pub use progress::{
    DownloadProgressParser, EncodeProgressParser, LogOnlyParser, ParsedLine, PercentTracker,
    ProgressParser,
};
pub use tools::{check_tool, ToolPaths};
pub use transcode::{is_supported_media, EncodePlan, RateControl};

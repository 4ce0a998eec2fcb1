//! Progress parsing adapters, one per external tool.
//!
//! Each adapter turns a single line of tool output into an optional completion
//! percentage and decides whether the line is worth forwarding as a log event.
//! They are pure and are tested against captured output.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Outcome of parsing one output line.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ParsedLine {
    /// Completion percentage extracted from the line
    pub percent: Option<f64>,
    /// Forward the line to the observer as a log event
    pub loggable: bool,
}

impl ParsedLine {
    fn log_only() -> Self {
        Self {
            percent: None,
            loggable: true,
        }
    }
}

/// Line-oriented progress extraction for one tool.
pub trait ProgressParser: Send {
    fn parse_line(&mut self, line: &str) -> ParsedLine;
}

/// Forwards every line, never reports a percentage.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlyParser;

impl ProgressParser for LogOnlyParser {
    fn parse_line(&mut self, _line: &str) -> ParsedLine {
        ParsedLine::log_only()
    }
}

fn download_percent_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[download\]\s+(\d+(?:\.\d+)?)%").expect("download progress regex is valid")
    })
}

/// Download agent output: `[download]  42.3% of 10.00MiB at ...`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DownloadProgressParser;

impl ProgressParser for DownloadProgressParser {
    fn parse_line(&mut self, line: &str) -> ParsedLine {
        let percent = download_percent_regex()
            .captures(line)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .map(|p| p.clamp(0.0, 100.0));

        ParsedLine {
            percent,
            loggable: true,
        }
    }
}

/// Running encoder state accumulated from `-progress pipe:2` output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncodeProgress {
    /// Current frame number
    pub frame: u64,
    /// Encoded output time in milliseconds
    pub out_time_ms: i64,
    /// Encoding speed (e.g., 1.5 = 1.5x realtime)
    pub speed: f64,
    /// Whether encoding is complete
    pub is_complete: bool,
}

impl EncodeProgress {
    /// Calculate progress percentage given total duration in milliseconds.
    pub fn percentage(&self, total_duration_ms: i64) -> f64 {
        if self.is_complete {
            return 100.0;
        }
        if total_duration_ms <= 0 || self.out_time_ms <= 0 {
            return 0.0;
        }
        ((self.out_time_ms as f64 / total_duration_ms as f64) * 100.0).min(100.0)
    }
}

/// Encoder output: key/value blocks terminated by `progress=continue|end`.
///
/// The key/value lines are consumed silently; anything else (warnings, errors)
/// is forwarded as a log line.
#[derive(Debug, Clone)]
pub struct EncodeProgressParser {
    total_duration_ms: i64,
    current: EncodeProgress,
}

impl EncodeProgressParser {
    pub fn new(total_duration_secs: f64) -> Self {
        Self {
            total_duration_ms: (total_duration_secs * 1000.0) as i64,
            current: EncodeProgress::default(),
        }
    }

    pub fn current(&self) -> &EncodeProgress {
        &self.current
    }
}

impl ProgressParser for EncodeProgressParser {
    fn parse_line(&mut self, line: &str) -> ParsedLine {
        let line = line.trim();

        let Some((key, value)) = line.split_once('=') else {
            return ParsedLine::log_only();
        };
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return ParsedLine::log_only();
        }

        let value = value.trim();
        match key {
            "out_time" => {
                if let Some(secs) = parse_timestamp(value) {
                    self.current.out_time_ms = (secs * 1000.0) as i64;
                }
            }
            "out_time_us" => {
                if let Ok(us) = value.parse::<i64>() {
                    self.current.out_time_ms = us / 1000;
                }
            }
            "frame" => {
                if let Ok(frame) = value.parse() {
                    self.current.frame = frame;
                }
            }
            "speed" => {
                if let Some(speed) = value.strip_suffix('x').and_then(|s| s.trim().parse().ok()) {
                    self.current.speed = speed;
                }
            }
            "progress" => {
                if value == "end" {
                    self.current.is_complete = true;
                }
                return ParsedLine {
                    percent: Some(self.current.percentage(self.total_duration_ms)),
                    loggable: false,
                };
            }
            _ => {}
        }

        ParsedLine {
            percent: None,
            loggable: false,
        }
    }
}

/// Parse `HH:MM:SS.ff` (hours may exceed two digits) into seconds.
///
/// Negative timestamps, which the encoder prints before the first packet,
/// yield `None`.
pub fn parse_timestamp(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.starts_with('-') {
        return None;
    }
    let mut parts = s.splitn(3, ':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if !(0.0..60.0).contains(&minutes) || !(0.0..60.0).contains(&seconds) {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Keeps reported percentages inside [0, 100] and non-decreasing per stage.
///
/// A new stage label resets the floor, so percentages may drop across stage
/// transitions but never within one.
#[derive(Debug, Default, Clone)]
pub struct PercentTracker {
    stage: Option<String>,
    last: Option<f64>,
}

impl PercentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value to report, or `None` if it would go backwards or
    /// repeats the previous value.
    pub fn accept(&mut self, stage: &str, percent: f64) -> Option<f64> {
        if !percent.is_finite() {
            return None;
        }
        let percent = percent.clamp(0.0, 100.0);

        if self.stage.as_deref() != Some(stage) {
            self.stage = Some(stage.to_string());
            self.last = Some(percent);
            return Some(percent);
        }

        match self.last {
            Some(last) if percent <= last => None,
            _ => {
                self.last = Some(percent);
                Some(percent)
            }
        }
    }
}

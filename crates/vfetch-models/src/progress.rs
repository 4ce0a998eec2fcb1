//! Progress event schema.
//!
//! One JSON object per server-sent message. The field names match what the
//! browser client reads (`stage`, `percent`, `log`, `error`, `final_url`).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reserved `log` value marking the end of a job's event sequence.
pub const DONE_SENTINEL: &str = "DONE";

/// Rewrite a log line that would read as the sentinel.
///
/// Only [`ProgressEvent::done`] may produce a bare `DONE`; tool output that
/// happens to match it is prefixed.
pub fn escape_log_line(line: impl Into<String>) -> String {
    let line = line.into();
    if line.trim() == DONE_SENTINEL {
        format!("> {}", line.trim())
    } else {
        line
    }
}

/// A single progress message. All fields are optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProgressEvent {
    /// Human-readable phase label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,

    /// Completion percentage (0-100) within the current stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,

    /// Raw or synthesized log text, or the `DONE` sentinel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,

    /// Terminal failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Shareable URL, set by the publish stage on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
}

impl ProgressEvent {
    /// Stage label with a percentage.
    pub fn stage(label: impl Into<String>, percent: f64) -> Self {
        Self {
            stage: Some(label.into()),
            percent: Some(percent.clamp(0.0, 100.0)),
            ..Default::default()
        }
    }

    /// Stage label without a percentage.
    pub fn stage_only(label: impl Into<String>) -> Self {
        Self {
            stage: Some(label.into()),
            ..Default::default()
        }
    }

    /// Log line. A line equal to the sentinel is escaped.
    pub fn log(line: impl Into<String>) -> Self {
        Self {
            log: Some(escape_log_line(line)),
            ..Default::default()
        }
    }

    /// Terminal failure.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Final milestone of a successful publish.
    pub fn published(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            stage: Some(label.into()),
            percent: Some(100.0),
            final_url: Some(url.into()),
            ..Default::default()
        }
    }

    /// The end-of-job sentinel.
    pub fn done() -> Self {
        Self {
            log: Some(DONE_SENTINEL.to_string()),
            ..Default::default()
        }
    }

    pub fn is_done(&self) -> bool {
        self.log.as_deref() == Some(DONE_SENTINEL)
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_only_present_fields() {
        let json = serde_json::to_string(&ProgressEvent::stage("Downloading", 42.5)).unwrap();
        assert_eq!(json, r#"{"stage":"Downloading","percent":42.5}"#);

        let json = serde_json::to_string(&ProgressEvent::done()).unwrap();
        assert_eq!(json, r#"{"log":"DONE"}"#);
    }

    #[test]
    fn test_percent_is_clamped() {
        assert_eq!(ProgressEvent::stage("x", 140.0).percent, Some(100.0));
        assert_eq!(ProgressEvent::stage("x", -3.0).percent, Some(0.0));
    }

    #[test]
    fn test_done_detection() {
        assert!(ProgressEvent::done().is_done());
        assert!(!ProgressEvent::log("DONE.").is_done());
        assert!(!ProgressEvent::log("DONE").is_done());
        assert!(!ProgressEvent::log("  DONE\r").is_done());
        assert_eq!(ProgressEvent::log("DONE").log.as_deref(), Some("> DONE"));
        assert!(ProgressEvent::error("boom").is_error());
    }

    #[test]
    fn test_published_carries_url() {
        let event = ProgressEvent::published("Upload complete", "https://pixeldrain.com/u/abc");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["final_url"], "https://pixeldrain.com/u/abc");
        assert_eq!(json["percent"], 100.0);
    }
}

//! Job identity and lifecycle.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix used in interim file names.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(8);
        &self.0[..end]
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job lifecycle state.
///
/// `Queued -> Running -> {Succeeded, Failed}`. There is no cancelled state:
/// a started job runs until its stage returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Queued, JobState::Running)
                | (JobState::Queued, JobState::Failed)
                | (JobState::Running, JobState::Succeeded)
                | (JobState::Running, JobState::Failed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The pipeline stage a job was submitted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    FetchMerge,
    DirectFetch,
    Transcode,
    Publish,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::FetchMerge => "fetch_merge",
            StageKind::DirectFetch => "direct_fetch",
            StageKind::Transcode => "transcode",
            StageKind::Publish => "publish",
        }
    }

    /// Parse an operation name from the invocation surface.
    ///
    /// Accepts the legacy action names of the form-based UI as aliases.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "fetch_merge" | "manual_merge" | "download" => Some(StageKind::FetchMerge),
            "direct_fetch" | "direct_download" => Some(StageKind::DirectFetch),
            "transcode" | "encode" => Some(StageKind::Transcode),
            "publish" | "upload" => Some(StageKind::Publish),
            _ => None,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a job, readable without consuming its events.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub stage_kind: StageKind,
    pub state: JobState,
    /// Last stage label reported by the job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// Last percentage reported for the current stage label
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobSnapshot {
    pub fn new(job_id: JobId, stage_kind: StageKind) -> Self {
        Self {
            job_id,
            stage_kind,
            state: JobState::Queued,
            stage: None,
            percent: None,
            error: None,
            final_url: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        assert!(JobState::Queued.can_transition_to(JobState::Running));
        assert!(JobState::Running.can_transition_to(JobState::Succeeded));
        assert!(JobState::Running.can_transition_to(JobState::Failed));
        assert!(!JobState::Succeeded.can_transition_to(JobState::Running));
        assert!(!JobState::Failed.can_transition_to(JobState::Succeeded));
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Running.is_terminal());
    }

    #[test]
    fn test_stage_kind_aliases() {
        assert_eq!(StageKind::parse("manual_merge"), Some(StageKind::FetchMerge));
        assert_eq!(StageKind::parse("direct_download"), Some(StageKind::DirectFetch));
        assert_eq!(StageKind::parse(" Transcode "), Some(StageKind::Transcode));
        assert_eq!(StageKind::parse("delete"), None);
    }

    #[test]
    fn test_job_id_short() {
        let id = JobId::from_string("0123456789abcdef");
        assert_eq!(id.short(), "01234567");
        assert_eq!(JobId::from_string("ab").short(), "ab");
    }
}

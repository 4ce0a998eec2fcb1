//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Another observer is attached to the job's event stream.
    #[error("Job {0} already has an observer")]
    AlreadyObserved(String),

    /// The job's events were fully delivered; only its snapshot remains.
    #[error("Events for job {0} were already delivered")]
    Drained(String),

    #[error("Job {0} already exists")]
    DuplicateJob(String),
}

impl QueueError {
    pub fn job_not_found(id: impl Into<String>) -> Self {
        Self::JobNotFound(id.into())
    }
}

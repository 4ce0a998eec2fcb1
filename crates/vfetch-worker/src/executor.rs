//! Background job runner.
//!
//! Every submitted stage runs on its own tokio task. The stage itself runs in
//! a nested task so a panic surfaces as a `JoinError` instead of tearing down
//! the job silently. Whatever happens, the job's event sequence ends with one
//! `DONE`.

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use tracing::Instrument;
use vfetch_models::{JobId, JobState, StageRequest};
use vfetch_queue::{ProgressHub, ProgressSender};

use crate::context::PipelineContext;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::stages;

/// Metric names recorded by the runner.
pub mod names {
    pub const JOBS_STARTED_TOTAL: &str = "vfetch_jobs_started_total";
    pub const JOBS_SUCCEEDED_TOTAL: &str = "vfetch_jobs_succeeded_total";
    pub const JOBS_FAILED_TOTAL: &str = "vfetch_jobs_failed_total";
    pub const JOB_DURATION_SECONDS: &str = "vfetch_job_duration_seconds";
    pub const JOBS_RUNNING: &str = "vfetch_jobs_running";
}

/// Message reported when a job task is torn down before finishing.
const INTERRUPTED_MESSAGE: &str = "Job interrupted before completion";

/// Runs stage requests in the background and routes their progress.
#[derive(Clone)]
pub struct JobRunner {
    ctx: Arc<PipelineContext>,
    hub: ProgressHub,
}

impl JobRunner {
    pub fn new(ctx: Arc<PipelineContext>, hub: ProgressHub) -> Self {
        Self { ctx, hub }
    }

    pub fn hub(&self) -> &ProgressHub {
        &self.hub
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.ctx
    }

    /// Validate `request`, register its job and start it immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, request: StageRequest) -> WorkerResult<JobId> {
        request.validate().map_err(WorkerError::InvalidRequest)?;

        let kind = request.kind();
        let job_id = JobId::new();
        let sender = self.hub.create(job_id.clone(), kind)?;
        sender.set_state(JobState::Running);

        counter!(names::JOBS_STARTED_TOTAL, "stage" => kind.as_str()).increment(1);
        gauge!(names::JOBS_RUNNING).increment(1.0);

        tokio::spawn(execute(Arc::clone(&self.ctx), sender, request));
        Ok(job_id)
    }

    /// Wait until no job is running, up to `timeout`. Returns whether the
    /// runner went idle in time.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.hub.active_count() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// Drive one job to its terminal state.
async fn execute(ctx: Arc<PipelineContext>, sender: ProgressSender, request: StageRequest) {
    let kind = request.kind();
    let logger = JobLogger::new(sender.job_id(), kind);
    let span = logger.create_span();
    let guard = DoneGuard::new(sender.clone(), logger.clone());
    let started = Instant::now();

    logger.log_start(kind.as_str());

    let stage_sender = sender.clone();
    let handle = tokio::spawn(
        async move { stages::run(&ctx, &stage_sender, request).await }.instrument(span),
    );

    let outcome = match handle.await {
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(e)) => Err((e.kind(), e.to_string())),
        Err(join_error) if join_error.is_panic() => {
            Err(("panic", panic_message(join_error.into_panic())))
        }
        Err(_) => Err(("cancelled", INTERRUPTED_MESSAGE.to_string())),
    };

    match outcome {
        Ok(outcome) => {
            sender.set_state(JobState::Succeeded);
            let detail = match (&outcome.output, &outcome.final_url) {
                (Some(path), Some(url)) => {
                    logger.log_progress(&format!("wrote {}", path.display()));
                    format!("published at {}", url)
                }
                (None, Some(url)) => format!("published at {}", url),
                (Some(path), None) => format!("wrote {}", path.display()),
                (None, None) => "no output".to_string(),
            };
            logger.log_completion(&detail);
            counter!(names::JOBS_SUCCEEDED_TOTAL, "stage" => kind.as_str()).increment(1);
        }
        Err((reason, message)) => {
            sender.error(&message);
            sender.set_state(JobState::Failed);
            logger.log_error(&message);
            counter!(
                names::JOBS_FAILED_TOTAL,
                "stage" => kind.as_str(),
                "reason" => reason
            )
            .increment(1);
        }
    }

    histogram!(names::JOB_DURATION_SECONDS, "stage" => kind.as_str())
        .record(started.elapsed().as_secs_f64());
    drop(guard);
}

/// Ends the job's sequence when dropped.
///
/// On the normal path the job is already terminal and this only sends `DONE`.
/// If the task is dropped early (runtime shutdown) the job is failed first.
struct DoneGuard {
    sender: ProgressSender,
    logger: JobLogger,
}

impl DoneGuard {
    fn new(sender: ProgressSender, logger: JobLogger) -> Self {
        Self { sender, logger }
    }
}

impl Drop for DoneGuard {
    fn drop(&mut self) {
        gauge!(names::JOBS_RUNNING).decrement(1.0);
        if self.sender.is_done() {
            return;
        }
        if !self.sender.state().is_some_and(|state| state.is_terminal()) {
            self.sender.error(INTERRUPTED_MESSAGE);
            self.sender.set_state(JobState::Failed);
            self.logger.log_warning("interrupted before reaching a terminal state");
        }
        self.sender.done();
    }
}

/// Text of a panic payload.
fn panic_message(payload: Box<dyn Any + Send>) -> String {
    let detail = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    };
    format!("Internal error: {}", detail)
}

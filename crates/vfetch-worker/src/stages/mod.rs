//! Pipeline stages.
//!
//! Each stage reports progress through the job's [`ProgressSender`] and
//! returns the file it produced. The job runner owns the terminal `error` and
//! `DONE` events; stages never emit them.

pub mod direct_fetch;
pub mod fetch_merge;
pub mod publish;
pub mod transcode;

use std::path::PathBuf;

use vfetch_models::StageRequest;
use vfetch_queue::ProgressSender;

use crate::context::PipelineContext;
use crate::error::WorkerResult;

/// What a finished stage produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageOutcome {
    /// Local file written or uploaded
    pub output: Option<PathBuf>,
    /// Shareable link when the file was published
    pub final_url: Option<String>,
}

/// Run one stage invocation, chaining into publish when requested.
pub async fn run(
    ctx: &PipelineContext,
    job: &ProgressSender,
    request: StageRequest,
) -> WorkerResult<StageOutcome> {
    let (output, publish_after) = match request {
        StageRequest::FetchMerge(req) => (fetch_merge::run(ctx, job, &req).await?, req.publish),
        StageRequest::DirectFetch(req) => (direct_fetch::run(ctx, job, &req).await?, req.publish),
        StageRequest::Transcode(req) => (transcode::run(ctx, job, &req).await?, req.publish),
        StageRequest::Publish(req) => {
            let path = ctx.config.resolve_path(&req.path)?;
            let url = publish::run(ctx, job, &path).await?;
            return Ok(StageOutcome {
                output: Some(path),
                final_url: Some(url),
            });
        }
    };

    let final_url = if publish_after {
        Some(publish::run(ctx, job, &output).await?)
    } else {
        None
    };

    Ok(StageOutcome {
        output: Some(output),
        final_url,
    })
}

//! Upload a local file and report its shareable link.

use std::path::Path;

use tracing::info;
use vfetch_models::{human_size, ProgressEvent};
use vfetch_queue::ProgressSender;

use crate::context::PipelineContext;
use crate::error::WorkerResult;

const PREPARE_STAGE: &str = "Preparing upload...";
const COMPLETE_STAGE: &str = "Upload complete!";

/// Upload `path`. Progress is reported as two coarse milestones; the last
/// event carries the public URL.
pub async fn run(ctx: &PipelineContext, job: &ProgressSender, path: &Path) -> WorkerResult<String> {
    job.stage(PREPARE_STAGE, 0.0);

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    if let Ok(metadata) = tokio::fs::metadata(path).await {
        job.log(format!("Uploading {} ({})", name, human_size(metadata.len())));
    }

    job.stage(format!("Uploading {}...", name), 50.0);
    let published = ctx.publisher.upload_file(path).await?;

    info!(job_id = %job.job_id(), url = %published.url, "Published {}", name);
    job.log(format!("Shareable link: {}", published.url));
    job.emit(ProgressEvent::published(COMPLETE_STAGE, &published.url));

    Ok(published.url)
}

//! Stream an arbitrary URL to local storage.

use std::path::PathBuf;

use futures_util::StreamExt;
use reqwest::header::CONTENT_DISPOSITION;
use tokio::io::AsyncWriteExt;
use tracing::info;
use vfetch_media::{move_file, remove_quietly, MediaError};
use vfetch_models::{human_size, sanitize_filename, DirectFetchRequest, ProgressEvent};
use vfetch_queue::ProgressSender;

use crate::context::PipelineContext;
use crate::error::WorkerResult;

/// Name used when neither the response nor the URL yields one.
pub const FALLBACK_FILENAME: &str = "download.bin";

const START_STAGE: &str = "Starting direct download...";
const DOWNLOAD_STAGE: &str = "Downloading file...";
const COMPLETE_STAGE: &str = "Download complete!";

/// Log a size line this often when the total length is unknown.
const UNKNOWN_LENGTH_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// Direct-fetch stage entry point. Returns the saved file path.
pub async fn run(
    ctx: &PipelineContext,
    job: &ProgressSender,
    req: &DirectFetchRequest,
) -> WorkerResult<PathBuf> {
    job.stage(START_STAGE, 0.0);

    let response = ctx.http.get(req.url.trim()).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(MediaError::transport(format!("{} returned {}", req.url.trim(), status)).into());
    }

    let disposition = response
        .headers()
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let filename = resolve_filename(disposition.as_deref(), response.url());
    let total = response.content_length().filter(|len| *len > 0);

    let dir = ctx.download_dir();
    let target = dir.join(&filename);
    let partial = dir.join(format!(".partial-{}-{}", job.job_id().short(), filename));

    job.log(format!(
        "Saving {} ({})",
        filename,
        total.map(human_size).unwrap_or_else(|| "unknown size".to_string())
    ));

    let result: WorkerResult<u64> = async {
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut stream = response.bytes_stream();
        let mut received: u64 = 0;
        let mut last_percent: Option<f64> = None;
        let mut last_logged: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;

            match total {
                Some(total) => {
                    let percent = (received as f64 * 100.0 / total as f64).min(100.0).floor();
                    if last_percent.map_or(true, |last| percent > last) {
                        last_percent = Some(percent);
                        job.stage(DOWNLOAD_STAGE, percent);
                    }
                }
                None if received - last_logged >= UNKNOWN_LENGTH_LOG_BYTES => {
                    last_logged = received;
                    job.log(format!("Downloaded {}", human_size(received)));
                }
                None => {}
            }
        }

        file.flush().await?;
        drop(file);
        move_file(&partial, &target).await?;
        Ok(received)
    }
    .await;

    let received = match result {
        Ok(received) => received,
        Err(e) => {
            remove_quietly(&partial).await;
            return Err(e);
        }
    };

    info!(
        job_id = %job.job_id(),
        file = %target.display(),
        bytes = received,
        "Direct download finished"
    );
    job.log(format!("Saved {} ({})", filename, human_size(received)));
    if total.is_some() {
        job.stage(COMPLETE_STAGE, 100.0);
    } else {
        job.emit(ProgressEvent::stage_only(COMPLETE_STAGE));
    }

    Ok(target)
}

/// Pick the local filename: content-disposition first, then the last URL
/// path segment, then [`FALLBACK_FILENAME`]. Always sanitized.
pub fn resolve_filename(content_disposition: Option<&str>, url: &url::Url) -> String {
    let from_header = content_disposition.and_then(disposition_filename);
    let from_url = || {
        url.path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty())
            .map(|segment| {
                urlencoding::decode(segment)
                    .map(|decoded| decoded.into_owned())
                    .unwrap_or_else(|_| segment.to_string())
            })
    };

    [from_header, from_url()]
        .into_iter()
        .flatten()
        .map(|name| sanitize_filename(&name))
        .find(|name| !name.is_empty())
        .unwrap_or_else(|| FALLBACK_FILENAME.to_string())
}

/// Filename from a content-disposition value.
///
/// The RFC 5987 `filename*=charset'lang'percent-encoded` form wins over a
/// plain `filename=` parameter.
fn disposition_filename(value: &str) -> Option<String> {
    let mut plain = None;

    for param in value.split(';').map(str::trim) {
        let Some((key, raw)) = param.split_once('=') else {
            continue;
        };
        let raw = raw.trim().trim_matches('"');
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                let encoded = raw.splitn(3, '\'').nth(2).unwrap_or(raw);
                if let Ok(decoded) = urlencoding::decode(encoded) {
                    if !decoded.trim().is_empty() {
                        return Some(decoded.into_owned());
                    }
                }
            }
            "filename" if !raw.is_empty() => plain = Some(raw.to_string()),
            _ => {}
        }
    }

    plain
}

//! Job submission and status handlers.
//!
//! Jobs are submitted as flat parameters, either form-encoded (what the
//! browser form posts) or as a JSON object. Booleans accept `true`, `on`,
//! `1` and `yes`.

use std::collections::HashMap;
use std::str::FromStr;

use axum::extract::{FromRequest, Path, Request, State};
use axum::http::{header, StatusCode};
use axum::{Form, Json};
use serde::Serialize;
use tracing::info;

use vfetch_models::{
    DirectFetchRequest, FetchMergeRequest, JobId, JobSnapshot, PassMode, PublishRequest,
    StageKind, StageRequest, TranscodeOptions, TranscodeRequest, VideoCodec,
};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Accepted job.
#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: JobId,
    pub operation: StageKind,
    /// Server-sent event stream for this job
    pub events_url: String,
    /// Snapshot endpoint for this job
    pub status_url: String,
}

/// Submit a stage invocation. The job starts immediately.
pub async fn submit_job(
    State(state): State<AppState>,
    request: Request,
) -> ApiResult<(StatusCode, Json<SubmitJobResponse>)> {
    let params = read_params(request).await?;
    let stage_request = match JobParams(params).into_request() {
        Ok(r) => r,
        Err(e) => {
            metrics::record_job_rejected("bad_params");
            return Err(e);
        }
    };

    let operation = stage_request.kind();
    let job_id = state.runner.submit(stage_request).map_err(|e| {
        metrics::record_job_rejected("invalid_request");
        ApiError::from(e)
    })?;

    metrics::record_job_submitted(operation.as_str());
    info!(job_id = %job_id, operation = %operation, "Job submitted");

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            events_url: format!("/api/jobs/{}/events", job_id),
            status_url: format!("/api/jobs/{}", job_id),
            job_id,
            operation,
        }),
    ))
}

/// Current snapshot of one job.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobSnapshot>> {
    state
        .hub()
        .status(&JobId::from_string(job_id.as_str()))
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Job not found: {}", job_id)))
}

/// Snapshots of every job still in the registry, newest first.
pub async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobSnapshot>> {
    Json(state.hub().list())
}

/// Read flat parameters from a JSON or form-encoded body.
async fn read_params(request: Request) -> ApiResult<HashMap<String, String>> {
    let is_json = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.trim_start().starts_with("application/json"))
        .unwrap_or(false);

    if is_json {
        let Json(values) = Json::<HashMap<String, serde_json::Value>>::from_request(request, &())
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        Ok(values
            .into_iter()
            .filter_map(|(key, value)| json_scalar(value).map(|v| (key, v)))
            .collect())
    } else {
        let Form(values) = Form::<HashMap<String, String>>::from_request(request, &())
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        Ok(values)
    }
}

fn json_scalar(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

/// Flat submission parameters.
struct JobParams(HashMap<String, String>);

impl JobParams {
    /// Trimmed non-empty value.
    fn text(&self, key: &str) -> Option<String> {
        self.0
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    fn flag(&self, key: &str) -> bool {
        self.text(key)
            .map(|v| matches!(v.to_lowercase().as_str(), "true" | "on" | "1" | "yes"))
            .unwrap_or(false)
    }

    fn number<T: FromStr>(&self, key: &str) -> ApiResult<Option<T>> {
        self.text(key)
            .map(|v| {
                v.parse::<T>()
                    .map_err(|_| ApiError::bad_request(format!("Invalid {}: {}", key, v)))
            })
            .transpose()
    }

    fn transcode_options(&self) -> ApiResult<TranscodeOptions> {
        let codec = match self.text("codec") {
            Some(v) => VideoCodec::from_str(&v).map_err(ApiError::bad_request)?,
            None => VideoCodec::None,
        };
        let pass_mode = match self.text("pass_mode") {
            Some(v) => PassMode::from_str(&v).map_err(ApiError::bad_request)?,
            None => PassMode::OnePass,
        };

        Ok(TranscodeOptions {
            codec,
            pass_mode,
            video_bitrate_kbps: self.number("video_bitrate")?,
            crf: self.number("crf")?,
            audio_bitrate_kbps: self.number("audio_bitrate")?,
            frame_rate: self.number("fps")?,
            force_stereo: self.flag("force_stereo"),
        })
    }

    fn into_request(self) -> ApiResult<StageRequest> {
        let operation = self
            .text("operation")
            .ok_or_else(|| ApiError::bad_request("Missing operation"))?;
        let kind = StageKind::parse(&operation)
            .ok_or_else(|| ApiError::bad_request(format!("Unknown operation: {}", operation)))?;

        let request = match kind {
            StageKind::FetchMerge => StageRequest::FetchMerge(FetchMergeRequest {
                url: self.text("url").unwrap_or_default(),
                video_id: self.text("video_id").unwrap_or_default(),
                audio_id: self.text("audio_id"),
                is_muxed: self.flag("is_muxed"),
                output_name: self.text("output_name"),
                transcode: self.transcode_options()?,
                publish: self.flag("publish"),
            }),
            StageKind::DirectFetch => StageRequest::DirectFetch(DirectFetchRequest {
                url: self.text("url").unwrap_or_default(),
                publish: self.flag("publish"),
            }),
            StageKind::Transcode => StageRequest::Transcode(TranscodeRequest {
                input: self
                    .text("path")
                    .or_else(|| self.text("input"))
                    .unwrap_or_default(),
                output_name: self.text("output_name"),
                options: self.transcode_options()?,
                publish: self.flag("publish"),
            }),
            StageKind::Publish => StageRequest::Publish(PublishRequest {
                path: self.text("path").unwrap_or_default(),
            }),
        };
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> JobParams {
        JobParams(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_fetch_merge_params() {
        let request = params(&[
            ("operation", "fetch_merge"),
            ("url", "https://video.example/watch?v=1"),
            ("video_id", "137"),
            ("audio_id", " "),
            ("is_muxed", "on"),
            ("codec", "h265"),
            ("pass_mode", "2"),
            ("video_bitrate", "2500"),
            ("publish", "1"),
        ])
        .into_request()
        .unwrap();

        let StageRequest::FetchMerge(req) = request else {
            panic!("expected fetch_merge");
        };
        assert_eq!(req.video_id, "137");
        assert_eq!(req.audio_id, None);
        assert!(req.is_muxed);
        assert!(req.publish);
        assert_eq!(req.transcode.codec, VideoCodec::H265);
        assert_eq!(req.transcode.pass_mode, PassMode::TwoPass);
        assert_eq!(req.transcode.video_bitrate_kbps, Some(2500));
    }

    #[test]
    fn test_transcode_reads_path() {
        let request = params(&[
            ("operation", "transcode"),
            ("path", "clip.mp4"),
            ("crf", "30"),
            ("force_stereo", "true"),
        ])
        .into_request()
        .unwrap();

        let StageRequest::Transcode(req) = request else {
            panic!("expected transcode");
        };
        assert_eq!(req.input, "clip.mp4");
        assert_eq!(req.options.crf, Some(30));
        assert!(req.options.force_stereo);
        assert!(!req.publish);
    }

    #[test]
    fn test_rejects_bad_params() {
        assert!(params(&[]).into_request().is_err());
        assert!(params(&[("operation", "explode")]).into_request().is_err());
        assert!(params(&[("operation", "transcode"), ("path", "a.mp4"), ("crf", "high")])
            .into_request()
            .is_err());
        assert!(params(&[("operation", "transcode"), ("path", "a.mp4"), ("codec", "vp9")])
            .into_request()
            .is_err());
    }

    #[test]
    fn test_json_scalars() {
        assert_eq!(json_scalar(serde_json::json!(true)), Some("true".to_string()));
        assert_eq!(json_scalar(serde_json::json!(28)), Some("28".to_string()));
        assert_eq!(json_scalar(serde_json::json!("x")), Some("x".to_string()));
        assert_eq!(json_scalar(serde_json::Value::Null), None);
    }
}

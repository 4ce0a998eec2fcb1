//! Health check handlers.

use std::path::Path;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use vfetch_media::check_tool;

use crate::state::AppState;

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

/// Health check endpoint (liveness probe).
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Readiness check response.
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub checks: ReadinessChecks,
    pub active_jobs: usize,
}

#[derive(Serialize)]
pub struct ReadinessChecks {
    pub ytdlp: CheckStatus,
    pub ffmpeg: CheckStatus,
    pub ffprobe: CheckStatus,
    pub download_dir: CheckStatus,
}

#[derive(Serialize)]
pub struct CheckStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl CheckStatus {
    fn ok(path: impl Into<String>) -> Self {
        Self {
            status: "ok".to_string(),
            error: None,
            path: Some(path.into()),
        }
    }

    fn error(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            error: Some(msg.into()),
            path: None,
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

fn tool_check(program: &Path) -> CheckStatus {
    match check_tool(program) {
        Ok(resolved) => CheckStatus::ok(resolved.display().to_string()),
        Err(e) => CheckStatus::error(e.to_string()),
    }
}

/// Readiness check endpoint (readiness probe).
/// Checks that the external tools resolve and the download directory exists.
pub async fn ready(
    State(state): State<AppState>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    let config = &state.runner.context().config;

    let download_dir = if config.download_dir.is_dir() {
        CheckStatus::ok(config.download_dir.display().to_string())
    } else {
        CheckStatus::error(format!("{} is not a directory", config.download_dir.display()))
    };

    let checks = ReadinessChecks {
        ytdlp: tool_check(&config.tools.ytdlp),
        ffmpeg: tool_check(&config.tools.ffmpeg),
        ffprobe: tool_check(&config.tools.ffprobe),
        download_dir,
    };

    let all_ok = checks.ytdlp.is_ok()
        && checks.ffmpeg.is_ok()
        && checks.ffprobe.is_ok()
        && checks.download_dir.is_ok();

    let response = ReadinessResponse {
        status: if all_ok { "ready" } else { "degraded" }.to_string(),
        checks,
        active_jobs: state.hub().active_count(),
    };

    if all_ok {
        Ok(Json(response))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    }
}

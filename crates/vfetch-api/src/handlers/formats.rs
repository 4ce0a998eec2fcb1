//! Stream listing for the selection form.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use vfetch_models::StreamCandidate;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const NO_FORMATS_NOTICE: &str =
    "No formats found. The URL may be unsupported, private, or require cookies.";

#[derive(Debug, Deserialize)]
pub struct FormatsQuery {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FormatsResponse {
    pub url: String,
    pub raw_listing: String,
    pub video: Vec<StreamCandidate>,
    pub audio: Vec<StreamCandidate>,
    pub suggested_filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
}

/// List the streams available for a URL.
///
/// Extraction failures are soft: the response carries empty lists and a
/// notice instead of an error status.
pub async fn list_formats(
    State(state): State<AppState>,
    Query(query): Query<FormatsQuery>,
) -> ApiResult<Json<FormatsResponse>> {
    let raw = query
        .url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing url"))?;

    let parsed = url::Url::parse(raw).map_err(|e| ApiError::bad_request(format!("Invalid URL: {}", e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ApiError::bad_request(format!(
            "Unsupported URL scheme: {}",
            parsed.scheme()
        )));
    }

    let resolver = &state.runner.context().resolver;
    let (formats, suggested_filename) =
        tokio::join!(resolver.resolve(raw), resolver.suggested_filename(raw));

    info!(
        url = %raw,
        video = formats.video.len(),
        audio = formats.audio.len(),
        "Formats listed"
    );

    let notice = formats.is_empty().then(|| NO_FORMATS_NOTICE.to_string());

    Ok(Json(FormatsResponse {
        url: raw.to_string(),
        raw_listing: formats.raw_listing,
        video: formats.video,
        audio: formats.audio,
        suggested_filename,
        notice,
    }))
}

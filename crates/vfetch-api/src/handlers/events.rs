//! Server-sent progress streams.
//!
//! Each message's `data:` is one JSON progress event. When nothing arrives
//! within the keep-alive timeout a comment line is written instead. The
//! stream ends right after the `DONE` message.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::stream::{self, Stream};
use tracing::{debug, info};

use vfetch_models::{JobId, ProgressEvent};
use vfetch_queue::{ProgressSubscription, Received};

use crate::error::{ApiError, ApiResult};
use crate::metrics::{self, ObserverGauge};
use crate::state::AppState;

const KEEPALIVE_COMMENT: &str = "keep-alive";

/// Stream the events of one job.
pub async fn job_events(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Response> {
    let subscription = state.hub().subscribe(&JobId::from_string(job_id))?;
    Ok(Sse::new(event_stream(subscription, state.config.sse_keepalive)).into_response())
}

/// Stream the events of the most recently submitted job.
pub async fn latest_events(State(state): State<AppState>) -> ApiResult<Response> {
    let job_id = state
        .hub()
        .latest()
        .ok_or_else(|| ApiError::not_found("No job has been submitted"))?;
    let subscription = state.hub().subscribe(&job_id)?;
    Ok(Sse::new(event_stream(subscription, state.config.sse_keepalive)).into_response())
}

fn event_kind(event: &ProgressEvent) -> &'static str {
    if event.is_done() {
        "done"
    } else if event.is_error() {
        "error"
    } else if event.stage.is_some() {
        "stage"
    } else {
        "log"
    }
}

fn to_sse(event: &ProgressEvent) -> Event {
    match serde_json::to_string(event) {
        Ok(json) => Event::default().data(json),
        // Unreachable for this schema; keep the sequence intact regardless
        Err(_) => Event::default().data(r#"{"log":"(unserializable event)"}"#),
    }
}

fn event_stream(
    subscription: ProgressSubscription,
    keepalive: Duration,
) -> impl Stream<Item = Result<Event, Infallible>> {
    info!(job_id = %subscription.job_id(), "Observer attached");
    let observer = ObserverGauge::attach();

    stream::unfold(
        Some((subscription, observer)),
        move |state| async move {
            let (mut subscription, observer) = state?;
            match subscription.recv(keepalive).await {
                Received::Event(event) => {
                    metrics::record_sse_event(event_kind(&event));
                    let sse = to_sse(&event);
                    Some((Ok(sse), Some((subscription, observer))))
                }
                Received::KeepAlive => {
                    metrics::record_sse_keepalive();
                    let sse = Event::default().comment(KEEPALIVE_COMMENT);
                    Some((Ok(sse), Some((subscription, observer))))
                }
                Received::Closed => {
                    debug!(job_id = %subscription.job_id(), "Event stream complete");
                    None
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use vfetch_models::StageKind;
    use vfetch_queue::ProgressHub;

    #[tokio::test]
    async fn test_stream_ends_after_done() {
        let hub = ProgressHub::new();
        let job_id = JobId::new();
        let sender = hub.create(job_id.clone(), StageKind::Publish).unwrap();
        sender.stage("Uploading", 50.0);
        sender.done();

        let subscription = hub.subscribe(&job_id).unwrap();
        let items: Vec<_> = event_stream(subscription, Duration::from_millis(50))
            .collect()
            .await;
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn test_keepalive_while_idle() {
        let hub = ProgressHub::new();
        let job_id = JobId::new();
        let sender = hub.create(job_id.clone(), StageKind::Publish).unwrap();

        let subscription = hub.subscribe(&job_id).unwrap();
        let mut stream = Box::pin(event_stream(subscription, Duration::from_millis(20)));

        // Nothing emitted yet: first item is a keep-alive, stream still open
        assert!(stream.next().await.is_some());
        sender.done();
        assert!(stream.next().await.is_some());
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn test_event_kind() {
        assert_eq!(event_kind(&ProgressEvent::done()), "done");
        assert_eq!(event_kind(&ProgressEvent::error("boom")), "error");
        assert_eq!(event_kind(&ProgressEvent::stage("x", 1.0)), "stage");
        assert_eq!(event_kind(&ProgressEvent::log("line")), "log");
    }
}

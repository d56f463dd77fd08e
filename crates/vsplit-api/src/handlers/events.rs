//! Storage notification intake.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tracing::{debug, info};
use vsplit_pipeline::{EventClass, SkippedKey};

use crate::error::ApiResult;
use crate::services::{archive_event, confirm_subscription};
use crate::state::AppState;

/// Response body of `POST /events`.
#[derive(Debug, Serialize)]
pub struct EventResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<Vec<SkippedKey>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl EventResponse {
    fn confirmed() -> Self {
        Self {
            status: "confirmed",
            sources: None,
            skipped: None,
            reason: None,
        }
    }

    fn accepted(sources: Vec<String>, skipped: Vec<SkippedKey>) -> Self {
        Self {
            status: "accepted",
            sources: Some(sources),
            skipped: Some(skipped),
            reason: None,
        }
    }

    fn ignored(skipped: Option<Vec<SkippedKey>>, reason: Option<String>) -> Self {
        Self {
            status: "ignored",
            sources: None,
            skipped,
            reason,
        }
    }
}

/// Receive a storage notification.
///
/// Answers as soon as the event is classified; pipeline runs continue in
/// the background.
pub async fn receive_event(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<EventResponse>)> {
    let class = state.classifier.classify(&body)?;

    if state.config.archive_events && !matches!(class, EventClass::Handshake { .. }) {
        if let Ok(decoded) = state.classifier.notification_body(&body) {
            archive_event(state.store.as_ref(), state.classifier.layout(), &decoded).await;
        }
    }

    match class {
        EventClass::Handshake { subscribe_url } => {
            confirm_subscription(&state.http, &subscribe_url, &state.handshake_retry).await?;
            Ok((StatusCode::OK, Json(EventResponse::confirmed())))
        }
        EventClass::ObjectCreated { sources, mut skipped } => {
            if sources.is_empty() {
                debug!(skipped = skipped.len(), "Notification names no new source");
                return Ok((StatusCode::OK, Json(EventResponse::ignored(Some(skipped), None))));
            }

            let (started, in_flight) = state.launcher.launch(sources).await;
            skipped.extend(in_flight);

            if started.is_empty() {
                return Ok((StatusCode::OK, Json(EventResponse::ignored(Some(skipped), None))));
            }

            info!(sources = ?started, skipped = skipped.len(), "Accepted notification");
            Ok((
                StatusCode::ACCEPTED,
                Json(EventResponse::accepted(started, skipped)),
            ))
        }
        EventClass::Unrecognized { reason } => {
            info!(reason = %reason, "Ignoring unrecognized notification");
            Ok((StatusCode::OK, Json(EventResponse::ignored(None, Some(reason)))))
        }
    }
}

use std::collections::HashMap;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use revtrace_runtime::{EnqueueError, WorkItem};
use revtrace_store::{RawWebhookRecord, queries};
use revtrace_types::{ProcessingStatus, Source};

use crate::error::ApiError;
use crate::state::AppState;

/// `POST /webhooks/{org_slug}/{source}`
///
/// The receiver's entire job is durability: store the raw row, enqueue,
/// answer. Signatures are NOT checked here so that bad-signature deliveries
/// still appear in the log; the worker verifies and marks them skipped.
pub async fn receive(
    State(state): State<AppState>,
    Path((org_slug, source)): Path<(String, String)>,
    headers: HeaderMap,
    body: String,
) -> Result<impl IntoResponse, ApiError> {
    let source: Source = source.parse().map_err(|_| ApiError::Unauthorized)?;
    let header_map = flatten_headers(&headers);

    let queue_item = state
        .with_db(move |db| {
            let org = queries::orgs::get_by_slug(db.conn(), &org_slug)?
                .ok_or(ApiError::Unauthorized)?;
            // An unknown source for a known org is equally a 401; the raw
            // row is only stored for configured connections
            queries::connections::get(db.conn(), org.id, source)?
                .ok_or(ApiError::Unauthorized)?;

            let raw = RawWebhookRecord {
                id: Uuid::new_v4(),
                org_id: org.id,
                source,
                received_at: Utc::now(),
                headers: json!(header_map),
                body,
                processing_status: ProcessingStatus::Received,
                external_event_id: None,
                event_type: None,
                http_status: Some(200),
                error_message: None,
                processed_at: None,
                attempts: 0,
            };
            queries::raw_log::insert(db.conn(), &raw)?;

            Ok(WorkItem {
                raw_id: raw.id,
                org_id: org.id,
                source,
            })
        })
        .await?;

    match state.runtime.queue().enqueue(queue_item) {
        Ok(()) => {
            state
                .with_db(move |db| {
                    queries::raw_log::set_status(db.conn(), queue_item.raw_id, ProcessingStatus::Queued)?;
                    Ok(())
                })
                .await?;
            Ok((StatusCode::OK, Json(json!({"ok": true}))))
        }
        // Back-pressure: the row is durable but not queued; the provider
        // should redeliver
        Err(EnqueueError::BackPressure) | Err(EnqueueError::Closed) => Ok((
            StatusCode::ACCEPTED,
            Json(json!({"ok": false, "retry": true})),
        )),
    }
}

fn flatten_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

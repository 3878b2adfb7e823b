use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::{AppState, org_from_headers};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessCheckBody {
    pub user: String,
    pub has_access: bool,
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessCheckResponse {
    pub ok: bool,
    pub user_resolved: bool,
}

/// `POST /api/v1/access-checks` — fire-and-forget on the client side, so
/// this stays an append plus a best-effort identity lookup
pub async fn record(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<AccessCheckBody>,
) -> Result<Json<AccessCheckResponse>, ApiError> {
    if body.user.trim().is_empty() {
        return Err(ApiError::BadRequest("user must not be empty".to_string()));
    }

    let runtime = std::sync::Arc::clone(&state.runtime);
    let recorded = state
        .with_db(move |db| {
            let org_id = org_from_headers(db, &headers)?;
            Ok(runtime.deps().access.record(
                db.conn(),
                org_id,
                &body.user,
                body.has_access,
                body.observed_at,
                None,
            )?)
        })
        .await?;

    Ok(Json(AccessCheckResponse {
        ok: true,
        user_resolved: recorded.user_resolved,
    }))
}

#[derive(Debug, Deserialize)]
pub struct AccessCheckBatchBody {
    pub records: Vec<AccessCheckBody>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessCheckBatchResponse {
    pub ok: bool,
    pub recorded: usize,
    pub resolved: usize,
}

/// `POST /api/v1/access-checks/batch` — up to 500 records, atomically
pub async fn record_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<AccessCheckBatchBody>,
) -> Result<Json<AccessCheckBatchResponse>, ApiError> {
    if body.records.len() > revtrace_runtime::MAX_BATCH {
        return Err(ApiError::BadRequest(format!(
            "batch exceeds {} records",
            revtrace_runtime::MAX_BATCH
        )));
    }

    let runtime = std::sync::Arc::clone(&state.runtime);
    let recorded = state
        .with_db(move |db| {
            let org_id = org_from_headers(db, &headers)?;
            let records: Vec<(String, bool, Option<DateTime<Utc>>)> = body
                .records
                .into_iter()
                .map(|r| (r.user, r.has_access, r.observed_at))
                .collect();

            let recorded = db.with_tx(|conn| {
                runtime
                    .deps()
                    .access
                    .record_batch(conn, org_id, &records)
                    .map_err(|e| revtrace_store::Error::Query(e.to_string()))
            })?;
            Ok(recorded)
        })
        .await?;

    let resolved = recorded.iter().filter(|r| r.user_resolved).count();
    Ok(Json(AccessCheckBatchResponse {
        ok: true,
        recorded: recorded.len(),
        resolved,
    }))
}

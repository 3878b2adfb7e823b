use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use revtrace_store::queries;
use revtrace_types::{EventType, Source};

use crate::error::ApiError;
use crate::state::{AppState, org_from_headers};

/// `GET /api/v1/summary` — the dashboard's landing numbers
pub async fn summary(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    state
        .with_db(move |db| {
            let org_id = org_from_headers(db, &headers)?;
            let by_state = queries::entitlements::count_by_state(db.conn(), org_id)?;
            let entitlements: Value = by_state
                .iter()
                .map(|(state, count)| (state.as_str().to_string(), json!(count)))
                .collect::<serde_json::Map<String, Value>>()
                .into();

            Ok(Json(json!({
                "ok": true,
                "openIssues": queries::issues::count_open(db.conn(), org_id)?,
                "revenueAtRiskCents": queries::issues::open_revenue_cents(db.conn(), org_id)?,
                "eventCount": queries::events::count(db.conn(), org_id)?,
                "userCount": queries::users::count(db.conn(), org_id)?,
                "entitlementsByState": entitlements,
            })))
        })
        .await
}

/// `GET /api/v1/revenue-impact`
pub async fn revenue_impact(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    state
        .with_db(move |db| {
            let org_id = org_from_headers(db, &headers)?;
            let breakdown: Vec<Value> = queries::issues::open_revenue_by_type(db.conn(), org_id)?
                .into_iter()
                .map(|(issue_type, count, revenue)| {
                    json!({"issueType": issue_type, "openIssues": count, "revenueCents": revenue})
                })
                .collect();

            Ok(Json(json!({
                "ok": true,
                "revenueAtRiskCents": queries::issues::open_revenue_cents(db.conn(), org_id)?,
                "byIssueType": breakdown,
            })))
        })
        .await
}

/// `GET /api/v1/entitlements/health` — state distribution plus staleness
pub async fn entitlement_health(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    state
        .with_db(move |db| {
            let org_id = org_from_headers(db, &headers)?;
            let granting = queries::entitlements::list_access_granting(db.conn(), org_id)?;
            let stale_cutoff = Utc::now() - Duration::days(35);
            let stale = granting.iter().filter(|e| e.updated_at < stale_cutoff).count();

            let by_state = queries::entitlements::count_by_state(db.conn(), org_id)?;
            let states: Value = by_state
                .iter()
                .map(|(state, count)| (state.as_str().to_string(), json!(count)))
                .collect::<serde_json::Map<String, Value>>()
                .into();

            Ok(Json(json!({
                "ok": true,
                "byState": states,
                "accessGranting": granting.len(),
                "staleAccessGranting": stale,
            })))
        })
        .await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventListQuery {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

/// `GET /api/v1/events` — canonical event listing
pub async fn events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<EventListQuery>,
) -> Result<Json<Value>, ApiError> {
    let source = query
        .source
        .as_deref()
        .map(|s| s.parse::<Source>())
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let event_type = query
        .event_type
        .as_deref()
        .map(|s| s.parse::<EventType>())
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let limit = query.limit.unwrap_or(50).min(500);
    let offset = query.offset.unwrap_or(0);

    state
        .with_db(move |db| {
            let org_id = org_from_headers(db, &headers)?;
            let events =
                queries::events::list(db.conn(), org_id, source, event_type, limit, offset)?;
            Ok(Json(json!({"ok": true, "events": events})))
        })
        .await
}

/// `GET /api/v1/users/{id}` — user profile: identities, entitlements,
/// recent events
pub async fn user_profile(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    state
        .with_db(move |db| {
            let org_id = org_from_headers(db, &headers)?;
            let user = queries::users::get(db.conn(), org_id, user_id)?
                .ok_or_else(|| ApiError::NotFound("no such user".to_string()))?;

            Ok(Json(json!({
                "ok": true,
                "user": user,
                "identities": queries::identities::list_for_user(db.conn(), org_id, user_id)?,
                "entitlements": queries::entitlements::list_for_user(db.conn(), org_id, user_id)?,
                "recentEvents": queries::events::list_for_user(db.conn(), org_id, user_id, 50)?,
            })))
        })
        .await
}

/// `GET /api/v1/connections/health` — last-webhook freshness and 24h counters
pub async fn connections_health(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    state
        .with_db(move |db| {
            let org_id = org_from_headers(db, &headers)?;
            let report = revtrace_runtime::connection_health(db.conn(), org_id)?;
            Ok(Json(json!({"ok": true, "connections": report})))
        })
        .await
}

/// `GET /health` — process liveness, no org context
pub async fn health() -> Json<Value> {
    Json(json!({"ok": true}))
}

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use revtrace_engine::transition_issue;
use revtrace_store::queries;
use revtrace_types::{Issue, IssueSeverity, IssueStatus};

use crate::error::ApiError;
use crate::state::{AppState, org_from_headers};

/// `POST /issues/{id}/{acknowledge|resolve|dismiss}`
pub async fn transition(
    State(state): State<AppState>,
    Path((issue_id, action)): Path<(Uuid, String)>,
    headers: HeaderMap,
    body: Option<Json<Value>>,
) -> Result<Json<Value>, ApiError> {
    let next = match action.as_str() {
        "acknowledge" => IssueStatus::Acknowledged,
        "resolve" => IssueStatus::Resolved,
        "dismiss" => IssueStatus::Dismissed,
        other => {
            return Err(ApiError::BadRequest(format!("unknown action: {}", other)));
        }
    };
    let resolution = body
        .as_ref()
        .and_then(|json| json.0.get("resolution").and_then(Value::as_str))
        .map(str::to_string);

    let transition = state
        .with_db(move |db| {
            let org_id = org_from_headers(db, &headers)?;
            let transition =
                transition_issue(db.conn(), org_id, issue_id, next, resolution.as_deref())?;
            Ok(transition)
        })
        .await?;

    // Every status change feeds the alert sink; sink failures never undo
    // the transition
    let runtime = std::sync::Arc::clone(&state.runtime);
    let for_dispatch = transition.clone();
    state
        .with_db(move |db| {
            runtime.deps().alerts.dispatch_all(db.conn(), &[for_dispatch]);
            Ok(())
        })
        .await?;

    Ok(Json(json!({"ok": true, "issue": transition.issue})))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueListQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub issue_type: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

/// `GET /issues?status=&severity=&issueType=&limit=&offset=`
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<IssueListQuery>,
) -> Result<Json<Value>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(|s| s.parse::<IssueStatus>())
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let severity = query
        .severity
        .as_deref()
        .map(|s| s.parse::<IssueSeverity>())
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let filter = queries::issues::IssueFilter {
        status,
        severity,
        issue_type: query.issue_type.clone(),
        limit: query.limit.unwrap_or(50).min(500),
        offset: query.offset.unwrap_or(0),
    };

    let issues: Vec<Issue> = state
        .with_db(move |db| {
            let org_id = org_from_headers(db, &headers)?;
            Ok(queries::issues::list(db.conn(), org_id, &filter)?)
        })
        .await?;

    Ok(Json(json!({"ok": true, "issues": issues})))
}

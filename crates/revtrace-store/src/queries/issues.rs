use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use revtrace_types::{DetectionTier, Issue, IssueSeverity, IssueStatus};

use crate::db::{opt_ts, parse_opt_ts, parse_opt_uuid, parse_ts, parse_uuid, ts};
use crate::Result;

const SELECT_COLS: &str = "id, org_id, detector_id, issue_type, severity, status, user_id, title, \
     description, estimated_revenue_cents, confidence, evidence, detection_tier, dedup_key, \
     created_at, updated_at, resolved_at, resolution";

#[allow(clippy::type_complexity)]
fn row_tuple(row: &Row<'_>) -> rusqlite::Result<
    (String, String, String, String, String, String, Option<String>, String, String,
     Option<i64>, Option<f64>, String, String, String, String, String, Option<String>, Option<String>),
> {
    Ok((
        row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?,
        row.get(6)?, row.get(7)?, row.get(8)?, row.get(9)?, row.get(10)?, row.get(11)?,
        row.get(12)?, row.get(13)?, row.get(14)?, row.get(15)?, row.get(16)?, row.get(17)?,
    ))
}

#[allow(clippy::type_complexity)]
fn decode(
    raw: (String, String, String, String, String, String, Option<String>, String, String,
          Option<i64>, Option<f64>, String, String, String, String, String, Option<String>, Option<String>),
) -> Result<Issue> {
    let (id, org_id, detector_id, issue_type, severity, status, user_id, title, description,
         estimated_revenue_cents, confidence, evidence, detection_tier, dedup_key,
         created_at, updated_at, resolved_at, resolution) = raw;
    Ok(Issue {
        id: parse_uuid(&id)?,
        org_id: parse_uuid(&org_id)?,
        detector_id,
        issue_type,
        severity: severity.parse()?,
        status: status.parse()?,
        user_id: parse_opt_uuid(user_id)?,
        title,
        description,
        estimated_revenue_cents,
        confidence,
        evidence: serde_json::from_str(&evidence)?,
        detection_tier: detection_tier.parse()?,
        dedup_key,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
        resolved_at: parse_opt_ts(resolved_at)?,
        resolution,
    })
}

pub fn insert(conn: &Connection, issue: &Issue) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO issues
            (id, org_id, detector_id, issue_type, severity, status, user_id, title, description,
             estimated_revenue_cents, confidence, evidence, detection_tier, dedup_key,
             created_at, updated_at, resolved_at, resolution)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
        "#,
        params![
            issue.id.to_string(),
            issue.org_id.to_string(),
            &issue.detector_id,
            &issue.issue_type,
            issue.severity.as_str(),
            issue.status.as_str(),
            issue.user_id.map(|u| u.to_string()),
            &issue.title,
            &issue.description,
            issue.estimated_revenue_cents,
            issue.confidence,
            issue.evidence.to_string(),
            issue.detection_tier.as_str(),
            &issue.dedup_key,
            ts(issue.created_at),
            ts(issue.updated_at),
            opt_ts(issue.resolved_at),
            &issue.resolution,
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, org_id: Uuid, id: Uuid) -> Result<Option<Issue>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM issues WHERE org_id = ?1 AND id = ?2", SELECT_COLS),
            params![org_id.to_string(), id.to_string()],
            row_tuple,
        )
        .optional()?;
    row.map(decode).transpose()
}

/// The currently-open issue for a situation fingerprint. Acknowledged rows
/// still count: the situation is known but not closed.
pub fn find_open_by_dedup(conn: &Connection, org_id: Uuid, dedup_key: &str) -> Result<Option<Issue>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {} FROM issues \
                 WHERE org_id = ?1 AND dedup_key = ?2 AND status IN ('open', 'acknowledged') \
                 ORDER BY created_at DESC LIMIT 1",
                SELECT_COLS
            ),
            params![org_id.to_string(), dedup_key],
            row_tuple,
        )
        .optional()?;
    row.map(decode).transpose()
}

/// Refresh a still-open issue with the latest detection evidence
pub fn refresh(
    conn: &Connection,
    id: Uuid,
    severity: IssueSeverity,
    estimated_revenue_cents: Option<i64>,
    confidence: Option<f64>,
    evidence: &serde_json::Value,
) -> Result<()> {
    conn.execute(
        r#"
        UPDATE issues SET
            severity = ?2,
            estimated_revenue_cents = ?3,
            confidence = ?4,
            evidence = ?5,
            updated_at = ?6
        WHERE id = ?1
        "#,
        params![
            id.to_string(),
            severity.as_str(),
            estimated_revenue_cents,
            confidence,
            evidence.to_string(),
            ts(Utc::now()),
        ],
    )?;
    Ok(())
}

pub fn set_status(
    conn: &Connection,
    id: Uuid,
    status: IssueStatus,
    resolution: Option<&str>,
    at: DateTime<Utc>,
) -> Result<()> {
    let resolved_at = if status.is_closed() { Some(at) } else { None };
    conn.execute(
        r#"
        UPDATE issues SET status = ?2, resolution = ?3, resolved_at = ?4, updated_at = ?5
        WHERE id = ?1
        "#,
        params![
            id.to_string(),
            status.as_str(),
            resolution,
            opt_ts(resolved_at),
            ts(at)
        ],
    )?;
    Ok(())
}

pub struct IssueFilter {
    pub status: Option<IssueStatus>,
    pub severity: Option<IssueSeverity>,
    pub issue_type: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for IssueFilter {
    fn default() -> Self {
        Self {
            status: None,
            severity: None,
            issue_type: None,
            limit: 50,
            offset: 0,
        }
    }
}

pub fn list(conn: &Connection, org_id: Uuid, filter: &IssueFilter) -> Result<Vec<Issue>> {
    let mut where_clauses = vec!["org_id = ?".to_string()];
    let mut bind: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(org_id.to_string())];

    if let Some(status) = filter.status {
        where_clauses.push("status = ?".to_string());
        bind.push(Box::new(status.as_str().to_string()));
    }
    if let Some(severity) = filter.severity {
        where_clauses.push("severity = ?".to_string());
        bind.push(Box::new(severity.as_str().to_string()));
    }
    if let Some(issue_type) = &filter.issue_type {
        where_clauses.push("issue_type = ?".to_string());
        bind.push(Box::new(issue_type.clone()));
    }

    let query = format!(
        "SELECT {} FROM issues WHERE {} ORDER BY created_at DESC LIMIT {} OFFSET {}",
        SELECT_COLS,
        where_clauses.join(" AND "),
        filter.limit,
        filter.offset
    );

    let mut stmt = conn.prepare(&query)?;
    let rows = stmt.query_map(
        rusqlite::params_from_iter(bind.iter().map(|b| b.as_ref())),
        row_tuple,
    )?;

    let mut issues = Vec::new();
    for row in rows {
        issues.push(decode(row?)?);
    }
    Ok(issues)
}

/// Open Tier-2 issues last refreshed before the cutoff; auto-resolve sweep input
pub fn list_stale_open_tier2(
    conn: &Connection,
    org_id: Uuid,
    tier: DetectionTier,
    updated_before: DateTime<Utc>,
) -> Result<Vec<Issue>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM issues \
         WHERE org_id = ?1 AND detection_tier = ?2 AND status IN ('open', 'acknowledged') \
           AND updated_at < ?3",
        SELECT_COLS
    ))?;
    let rows = stmt.query_map(
        params![org_id.to_string(), tier.as_str(), ts(updated_before)],
        row_tuple,
    )?;

    let mut issues = Vec::new();
    for row in rows {
        issues.push(decode(row?)?);
    }
    Ok(issues)
}

pub fn rewrite_user(conn: &Connection, org_id: Uuid, from: Uuid, to: Uuid) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE issues SET user_id = ?3 WHERE org_id = ?1 AND user_id = ?2",
        params![org_id.to_string(), from.to_string(), to.to_string()],
    )?;
    Ok(changed)
}

pub fn count_open(conn: &Connection, org_id: Uuid) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM issues WHERE org_id = ?1 AND status IN ('open', 'acknowledged')",
        [org_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Revenue-at-risk broken down by issue type, open issues only
pub fn open_revenue_by_type(conn: &Connection, org_id: Uuid) -> Result<Vec<(String, i64, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT issue_type, COUNT(*), COALESCE(SUM(estimated_revenue_cents), 0) FROM issues \
         WHERE org_id = ?1 AND status IN ('open', 'acknowledged') \
         GROUP BY issue_type ORDER BY 3 DESC",
    )?;
    let rows = stmt.query_map([org_id.to_string()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;

    let mut breakdown = Vec::new();
    for row in rows {
        breakdown.push(row?);
    }
    Ok(breakdown)
}

/// Revenue-at-risk: summed estimates across open issues
pub fn open_revenue_cents(conn: &Connection, org_id: Uuid) -> Result<i64> {
    let sum: Option<i64> = conn.query_row(
        "SELECT SUM(estimated_revenue_cents) FROM issues \
         WHERE org_id = ?1 AND status IN ('open', 'acknowledged')",
        [org_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(sum.unwrap_or(0))
}

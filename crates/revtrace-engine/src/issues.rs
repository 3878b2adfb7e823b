use chrono::Utc;
use rusqlite::Connection;
use uuid::Uuid;

use revtrace_store::queries;
use revtrace_types::{DetectedIssue, Issue, IssueStatus};

use crate::{Error, Result};

/// An issue write the engine performed, paired with what the alert sink
/// needs: the row and the status it moved from (None for brand-new issues)
#[derive(Debug, Clone)]
pub struct IssueTransition {
    pub issue: Issue,
    pub previous_status: Option<IssueStatus>,
}

#[derive(Debug, Default)]
pub struct ReconcileStats {
    pub created: i64,
    pub updated: i64,
    pub transitions: Vec<IssueTransition>,
}

/// Fold detector findings into the issue store.
///
/// One open issue per `(org, dedup_key)`: a finding whose fingerprint is
/// already open refreshes evidence/revenue/updated_at (severity only ever
/// upgrades); a fingerprint whose previous issue is closed gets a fresh row.
/// Only creations are pushed to the alert sink; evidence refreshes are not
/// status transitions.
pub fn reconcile(
    conn: &Connection,
    org_id: Uuid,
    detector_id: &str,
    findings: Vec<DetectedIssue>,
) -> Result<ReconcileStats> {
    let mut stats = ReconcileStats::default();
    let now = Utc::now();

    for finding in findings {
        match queries::issues::find_open_by_dedup(conn, org_id, &finding.dedup_key)? {
            Some(existing) => {
                let severity = existing.severity.max(finding.severity);
                queries::issues::refresh(
                    conn,
                    existing.id,
                    severity,
                    finding.estimated_revenue_cents.or(existing.estimated_revenue_cents),
                    finding.confidence.or(existing.confidence),
                    &finding.evidence,
                )?;
                stats.updated += 1;
            }
            None => {
                let issue = Issue {
                    id: Uuid::new_v4(),
                    org_id,
                    detector_id: detector_id.to_string(),
                    issue_type: finding.issue_type,
                    severity: finding.severity,
                    status: IssueStatus::Open,
                    user_id: finding.user_id,
                    title: finding.title,
                    description: finding.description,
                    estimated_revenue_cents: finding.estimated_revenue_cents,
                    confidence: finding.confidence,
                    evidence: finding.evidence,
                    detection_tier: finding.tier,
                    dedup_key: finding.dedup_key,
                    created_at: now,
                    updated_at: now,
                    resolved_at: None,
                    resolution: None,
                };
                queries::issues::insert(conn, &issue)?;
                stats.created += 1;
                stats.transitions.push(IssueTransition {
                    issue,
                    previous_status: None,
                });
            }
        }
    }

    Ok(stats)
}

/// Administrative status change with lattice enforcement. Closed issues are
/// immutable; re-opening a situation is a new row created by the next scan.
pub fn transition_issue(
    conn: &Connection,
    org_id: Uuid,
    issue_id: Uuid,
    next: IssueStatus,
    resolution: Option<&str>,
) -> Result<IssueTransition> {
    let issue = queries::issues::get(conn, org_id, issue_id)?
        .ok_or_else(|| Error::InvalidTransition(format!("no such issue: {}", issue_id)))?;

    if !issue.status.can_transition_to(next) {
        return Err(Error::InvalidTransition(format!(
            "issue {} cannot move {} -> {}",
            issue_id,
            issue.status.as_str(),
            next.as_str()
        )));
    }

    let now = Utc::now();
    queries::issues::set_status(conn, issue_id, next, resolution, now)?;

    let previous_status = issue.status;
    let mut updated = issue;
    updated.status = next;
    updated.resolution = resolution.map(str::to_string);
    updated.updated_at = now;
    if next.is_closed() {
        updated.resolved_at = Some(now);
    }

    Ok(IssueTransition {
        issue: updated,
        previous_status: Some(previous_status),
    })
}

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

use revtrace_store::{Database, queries};
use revtrace_types::{
    CanonicalEvent, DetectedIssue, DetectionTier, EntitlementState, IssueSeverity, IssueStatus,
};

use crate::detector::{Detector, DetectorConfig, DetectorContext};
use crate::detectors;
use crate::issues::{self, IssueTransition};
use crate::projection::ProjectionOutcome;
use crate::Result;

/// Outcome of one scheduled scan, mirrored onto its detector_runs row
#[derive(Debug)]
pub struct ScanOutcome {
    pub run_id: Uuid,
    pub issues_created: i64,
    pub issues_updated: i64,
    pub error: Option<String>,
    pub transitions: Vec<IssueTransition>,
}

/// Detector host: owns the catalogue and the issue-write discipline.
/// Detector failures are contained per detector; the batch always finishes.
pub struct DetectionEngine {
    detectors: Vec<Box<dyn Detector>>,
    config: DetectorConfig,
}

impl DetectionEngine {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            detectors: detectors::all(),
            config,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn detectors(&self) -> &[Box<dyn Detector>] {
        &self.detectors
    }

    /// Inline pass after one event commits and projects. Runs in the worker
    /// thread to preserve happens-before with projection.
    pub fn run_event_detectors(
        &self,
        conn: &Connection,
        event: &CanonicalEvent,
    ) -> Vec<IssueTransition> {
        let ctx = DetectorContext {
            conn,
            config: &self.config,
            now: Utc::now(),
        };

        let mut transitions = Vec::new();
        for detector in &self.detectors {
            let findings = match detector.check_event(&ctx, event) {
                Ok(findings) => findings,
                Err(err) => {
                    tracing::error!(
                        detector = detector.id(),
                        event = %event.id,
                        error = %err,
                        "per-event detector failed; continuing batch"
                    );
                    continue;
                }
            };
            if findings.is_empty() {
                continue;
            }
            match issues::reconcile(conn, event.org_id, detector.id(), findings) {
                Ok(stats) => transitions.extend(stats.transitions),
                Err(err) => {
                    tracing::error!(
                        detector = detector.id(),
                        error = %err,
                        "issue reconcile failed"
                    );
                }
            }
        }
        transitions
    }

    /// One scheduled scan for one `(org, detector)`, ledgered in
    /// detector_runs. A detector error lands on the ledger row and is not
    /// propagated; the scheduler's other scans continue.
    pub fn run_scheduled_scan(
        &self,
        db: &mut Database,
        org_id: Uuid,
        detector: &dyn Detector,
    ) -> Result<ScanOutcome> {
        let run_id = queries::detector_runs::start(db.conn(), org_id, detector.id())?;

        let ctx = DetectorContext {
            conn: db.conn(),
            config: &self.config,
            now: Utc::now(),
        };
        let findings = match detector.scheduled_scan(&ctx, org_id) {
            Ok(findings) => findings,
            Err(err) => {
                let message = err.to_string();
                tracing::error!(
                    detector = detector.id(),
                    org = %org_id,
                    error = %message,
                    "scheduled scan failed"
                );
                queries::detector_runs::finish(db.conn(), run_id, 0, 0, Some(&message))?;
                return Ok(ScanOutcome {
                    run_id,
                    issues_created: 0,
                    issues_updated: 0,
                    error: Some(message),
                    transitions: Vec::new(),
                });
            }
        };

        let detector_id = detector.id();
        let stats = db.with_tx(|conn| {
            issues::reconcile(conn, org_id, detector_id, findings).map_err(|err| match err {
                crate::Error::Store(store) => store,
                other => revtrace_store::Error::Query(other.to_string()),
            })
        })?;

        queries::detector_runs::finish(db.conn(), run_id, stats.created, stats.updated, None)?;

        Ok(ScanOutcome {
            run_id,
            issues_created: stats.created,
            issues_updated: stats.updated,
            error: None,
            transitions: stats.transitions,
        })
    }

    /// Is this detector due for a scheduled scan, per its interval and the
    /// detector_runs ledger?
    pub fn is_due(
        &self,
        conn: &Connection,
        org_id: Uuid,
        detector: &dyn Detector,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(last) = queries::detector_runs::last_started_at(conn, org_id, detector.id())? else {
            return Ok(true);
        };
        let interval = Duration::from_std(detector.scan_interval())
            .unwrap_or_else(|_| Duration::seconds(300));
        Ok(now - last >= interval)
    }

    /// Lazy grace-period sweep: active/trial entitlements whose paid period
    /// lapsed more than the provider's grace window ago with no intervening
    /// event move to `grace_period`. Runs with the scheduled scans.
    pub fn apply_grace_transitions(&self, conn: &Connection, org_id: Uuid) -> Result<usize> {
        let now = Utc::now();

        // Pre-filter on the tightest configured window; an override shorter
        // than the default must still see its candidates
        let min_hours = self
            .config
            .grace_window_overrides
            .values()
            .copied()
            .chain(std::iter::once(self.config.grace_window_hours))
            .min()
            .unwrap_or(self.config.grace_window_hours);
        let cutoff = now - Duration::hours(min_hours);

        let lapsed = queries::entitlements::list_period_lapsed(conn, org_id, cutoff)?;
        let mut moved = 0;
        for entitlement in lapsed {
            let grace_hours = self
                .config
                .grace_window_overrides
                .get(entitlement.source.as_str())
                .copied()
                .unwrap_or(self.config.grace_window_hours);
            let source_cutoff = now - Duration::hours(grace_hours);
            if entitlement
                .current_period_end
                .map(|end| end < source_cutoff)
                .unwrap_or(false)
            {
                queries::entitlements::set_state(conn, entitlement.id, EntitlementState::GracePeriod)?;
                moved += 1;
            }
        }
        Ok(moved)
    }

    /// Tier-2 auto-resolve: app-verified issues with no fresh evidence for
    /// the configured horizon close themselves
    pub fn auto_resolve_stale_tier2(
        &self,
        conn: &Connection,
        org_id: Uuid,
    ) -> Result<Vec<IssueTransition>> {
        let horizon = Duration::hours(self.config.tier2_auto_resolve_hours);
        let cutoff = Utc::now() - horizon;

        let stale = queries::issues::list_stale_open_tier2(
            conn,
            org_id,
            DetectionTier::AppVerified,
            cutoff,
        )?;

        let mut transitions = Vec::new();
        for issue in stale {
            let transition = issues::transition_issue(
                conn,
                org_id,
                issue.id,
                IssueStatus::Resolved,
                Some("auto_resolved_stale_evidence"),
            )?;
            transitions.push(transition);
        }
        Ok(transitions)
    }

    /// Internal issue raised when a projection conflict is observed
    pub fn projection_conflict_finding(
        event: &CanonicalEvent,
        current: Option<EntitlementState>,
    ) -> DetectedIssue {
        let product = event
            .product_id
            .clone()
            .or_else(|| event.external_subscription_id.clone())
            .unwrap_or_else(|| "unknown".to_string());
        DetectedIssue {
            issue_type: "projection_conflict".to_string(),
            severity: IssueSeverity::Info,
            user_id: event.user_id,
            title: format!("Impossible {} transition for {}", event.event_type, product),
            description: format!(
                "A {} event arrived for an entitlement in state {:?}; the entitlement was left unchanged.",
                event.event_type, current
            ),
            estimated_revenue_cents: None,
            confidence: None,
            evidence: json!({
                "eventId": event.id,
                "eventType": event.event_type.as_str(),
                "currentState": current.map(|s| s.as_str()),
                "product": product,
            }),
            tier: DetectionTier::Tier1,
            dedup_key: format!(
                "projection_conflict:{}:{}",
                event.user_id.map(|u| u.to_string()).unwrap_or_default(),
                product
            ),
        }
    }

    /// Reconcile a projection outcome into the internal-issue stream
    pub fn record_projection_conflict(
        &self,
        conn: &Connection,
        event: &CanonicalEvent,
        outcome: &ProjectionOutcome,
    ) -> Vec<IssueTransition> {
        let ProjectionOutcome::Conflict { current, .. } = outcome else {
            return Vec::new();
        };
        let finding = Self::projection_conflict_finding(event, *current);
        match issues::reconcile(conn, event.org_id, "projection_conflict", vec![finding]) {
            Ok(stats) => stats.transitions,
            Err(err) => {
                tracing::error!(error = %err, "failed to record projection conflict");
                Vec::new()
            }
        }
    }
}

impl Default for DetectionEngine {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

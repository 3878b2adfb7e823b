use chrono::Duration;
use serde_json::json;
use uuid::Uuid;

use revtrace_store::queries;
use revtrace_types::{
    DetectedIssue, DetectionTier, DetectorCategory, DetectorScope, IssueSeverity,
};

use crate::detector::{Detector, DetectorContext};
use crate::Result;

const WINDOW_HOURS: i64 = 6;
const BASELINE_DAYS: i64 = 30;
/// Six-hour windows in thirty days
const BASELINE_WINDOWS: f64 = 120.0;

/// Renewal volume for a source collapsed against its 30-day rolling mean.
///
/// μ = R30 / 120. Sources with μ < 2 are too quiet to judge. A drop of 60 %
/// or more — or silence where μ ≥ 10 — is critical; 30 % is a warning.
pub struct RenewalAnomaly;

impl Detector for RenewalAnomaly {
    fn id(&self) -> &'static str {
        "renewal_anomaly"
    }

    fn category(&self) -> DetectorCategory {
        DetectorCategory::IntegrationHealth
    }

    fn scope(&self) -> DetectorScope {
        DetectorScope::Aggregate
    }

    fn tier(&self) -> DetectionTier {
        DetectionTier::Tier1
    }

    fn default_severity(&self) -> IssueSeverity {
        IssueSeverity::Warning
    }

    fn scheduled_scan(&self, ctx: &DetectorContext, org_id: Uuid) -> Result<Vec<DetectedIssue>> {
        let mut findings = Vec::new();

        for connection in queries::connections::list_active(ctx.conn, org_id)? {
            let source = connection.source;
            let recent = queries::events::count_renewals_since(
                ctx.conn,
                org_id,
                source,
                ctx.now - Duration::hours(WINDOW_HOURS),
            )?;
            let baseline_total = queries::events::count_renewals_since(
                ctx.conn,
                org_id,
                source,
                ctx.now - Duration::days(BASELINE_DAYS),
            )?;

            let mu = baseline_total as f64 / BASELINE_WINDOWS;
            if mu < 2.0 {
                continue;
            }

            let drop_percent = (mu - recent as f64) / mu * 100.0;
            let severity = if drop_percent >= ctx.config.renewal_critical_drop
                || (recent == 0 && mu >= 10.0)
            {
                IssueSeverity::Critical
            } else if drop_percent >= ctx.config.renewal_warning_drop {
                IssueSeverity::Warning
            } else {
                continue;
            };

            findings.push(DetectedIssue {
                issue_type: "renewal_anomaly".to_string(),
                severity,
                user_id: None,
                title: format!("{} renewals dropped {:.0}%", source, drop_percent),
                description: format!(
                    "{} renewals in the last {} hours: {} observed vs {:.1} expected from the {}-day baseline.",
                    source, WINDOW_HOURS, recent, mu, BASELINE_DAYS
                ),
                estimated_revenue_cents: None,
                confidence: None,
                evidence: json!({
                    "source": source.as_str(),
                    "recentCount": recent,
                    "expectedCount": mu,
                    "dropPercent": drop_percent,
                    "windowHours": WINDOW_HOURS,
                    "baselineDays": BASELINE_DAYS,
                }),
                tier: self.tier(),
                dedup_key: format!("renewal_anomaly:{}", source),
            });
        }

        Ok(findings)
    }
}

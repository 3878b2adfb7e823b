use chrono::Duration;
use serde_json::json;
use uuid::Uuid;

use revtrace_store::queries;
use revtrace_types::{
    DetectedIssue, DetectionTier, DetectorCategory, DetectorScope, IssueSeverity,
};

use crate::detector::{Detector, DetectorContext};
use crate::Result;

/// Too many supposedly-active entitlements have seen no events for weeks:
/// either the integration went deaf or the data is rotting.
pub struct DataFreshness;

impl Detector for DataFreshness {
    fn id(&self) -> &'static str {
        "data_freshness"
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

    /// Freshness drifts slowly; scanning every half hour is plenty
    fn scan_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(1800)
    }

    fn scheduled_scan(&self, ctx: &DetectorContext, org_id: Uuid) -> Result<Vec<DetectedIssue>> {
        let entitlements = queries::entitlements::list_access_granting(ctx.conn, org_id)?;
        if entitlements.len() < ctx.config.freshness_min_entitlements {
            return Ok(Vec::new());
        }

        let cutoff = ctx.now - Duration::days(ctx.config.freshness_days);
        let stale = entitlements
            .iter()
            .filter(|e| e.updated_at < cutoff)
            .count();
        let fraction = stale as f64 / entitlements.len() as f64;

        let severity = if fraction >= ctx.config.freshness_critical_fraction {
            IssueSeverity::Critical
        } else if fraction >= ctx.config.freshness_warning_fraction {
            IssueSeverity::Warning
        } else {
            return Ok(Vec::new());
        };

        Ok(vec![DetectedIssue {
            issue_type: "data_freshness".to_string(),
            severity,
            user_id: None,
            title: format!("{:.0}% of active entitlements are stale", fraction * 100.0),
            description: format!(
                "{} of {} access-granting entitlements have had no events in {} days.",
                stale,
                entitlements.len(),
                ctx.config.freshness_days
            ),
            estimated_revenue_cents: None,
            confidence: None,
            evidence: json!({
                "staleCount": stale,
                "totalCount": entitlements.len(),
                "staleFraction": fraction,
                "thresholdDays": ctx.config.freshness_days,
            }),
            tier: self.tier(),
            dedup_key: "data_freshness".to_string(),
        }])
    }
}

use chrono::Duration;
use serde_json::json;
use uuid::Uuid;

use revtrace_store::queries;
use revtrace_types::{
    DetectedIssue, DetectionTier, DetectorCategory, DetectorScope, IssueSeverity,
};

use crate::detector::{Detector, DetectorContext};
use crate::Result;

/// Tier-2: a paying entitlement contradicted by the app itself reporting
/// `has_access = false`. Confidence comes from how unanimous and how fresh
/// the access-check evidence is.
pub struct PaidNoAccess;

impl Detector for PaidNoAccess {
    fn id(&self) -> &'static str {
        "paid_no_access"
    }

    fn category(&self) -> DetectorCategory {
        DetectorCategory::Verified
    }

    fn scope(&self) -> DetectorScope {
        DetectorScope::PerUser
    }

    fn tier(&self) -> DetectionTier {
        DetectionTier::AppVerified
    }

    fn default_severity(&self) -> IssueSeverity {
        IssueSeverity::Warning
    }

    fn scheduled_scan(&self, ctx: &DetectorContext, org_id: Uuid) -> Result<Vec<DetectedIssue>> {
        let lookback = ctx.now - Duration::hours(ctx.config.access_check_lookback_hours);
        let mut findings = Vec::new();

        for entitlement in queries::entitlements::list_access_granting(ctx.conn, org_id)? {
            let checks =
                queries::access_checks::recent_for_user(ctx.conn, org_id, entitlement.user_id, lookback)?;
            let Some(latest) = checks.first() else {
                continue;
            };
            if latest.has_access {
                continue;
            }

            let denials = checks.iter().filter(|c| !c.has_access).count();
            let agreement = denials as f64 / checks.len() as f64;
            let age_hours = (ctx.now - latest.observed_at).num_minutes() as f64 / 60.0;
            let freshness = if age_hours <= 6.0 { 1.0 } else { 0.7 };
            let confidence = (agreement * freshness).clamp(0.0, 1.0);

            let severity = if confidence >= 0.9 {
                IssueSeverity::Critical
            } else {
                self.default_severity()
            };

            findings.push(DetectedIssue {
                issue_type: "paid_no_access".to_string(),
                severity,
                user_id: Some(entitlement.user_id),
                title: format!("Paying user locked out of {}", entitlement.product_id),
                description: format!(
                    "Entitlement for {} is `{}` but the app reported no access {} of {} times in the last {} hours.",
                    entitlement.product_id,
                    entitlement.state,
                    denials,
                    checks.len(),
                    ctx.config.access_check_lookback_hours
                ),
                estimated_revenue_cents: None,
                confidence: Some(confidence),
                evidence: json!({
                    "product": entitlement.product_id,
                    "source": entitlement.source.as_str(),
                    "entitlementState": entitlement.state.as_str(),
                    "checksConsidered": checks.len(),
                    "denials": denials,
                    "latestObservedAt": latest.observed_at.to_rfc3339(),
                }),
                tier: self.tier(),
                dedup_key: format!("paid_no_access:{}:{}", entitlement.user_id, entitlement.product_id),
            });
        }

        Ok(findings)
    }
}

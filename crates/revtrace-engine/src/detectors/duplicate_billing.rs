use std::collections::HashMap;

use serde_json::json;
use uuid::Uuid;

use revtrace_store::queries;
use revtrace_types::{
    CanonicalEvent, DetectedIssue, DetectionTier, DetectorCategory, DetectorScope, Entitlement,
    EventType, IssueSeverity,
};

use crate::detector::{Detector, DetectorContext};
use crate::product_family::product_family;
use crate::Result;

/// The same user pays for the same product family on more than one platform.
/// Fires inline when a purchase/renewal lands and on the scheduled sweep.
pub struct DuplicateBilling;

impl Detector for DuplicateBilling {
    fn id(&self) -> &'static str {
        "duplicate_billing"
    }

    fn category(&self) -> DetectorCategory {
        DetectorCategory::CrossPlatform
    }

    fn scope(&self) -> DetectorScope {
        DetectorScope::PerUser
    }

    fn tier(&self) -> DetectionTier {
        DetectionTier::Tier1
    }

    fn default_severity(&self) -> IssueSeverity {
        IssueSeverity::Critical
    }

    fn check_event(
        &self,
        ctx: &DetectorContext,
        event: &CanonicalEvent,
    ) -> Result<Vec<DetectedIssue>> {
        if !matches!(
            event.event_type,
            EventType::Purchase | EventType::Renewal | EventType::TrialConversion
        ) {
            return Ok(Vec::new());
        }
        let Some(user_id) = event.user_id else {
            return Ok(Vec::new());
        };

        let entitlements = queries::entitlements::list_for_user(ctx.conn, event.org_id, user_id)?;
        Ok(self.findings_for_user(ctx, user_id, &entitlements))
    }

    fn scheduled_scan(&self, ctx: &DetectorContext, org_id: Uuid) -> Result<Vec<DetectedIssue>> {
        let entitlements = queries::entitlements::list_access_granting(ctx.conn, org_id)?;

        let mut by_user: HashMap<Uuid, Vec<Entitlement>> = HashMap::new();
        for entitlement in entitlements {
            by_user.entry(entitlement.user_id).or_default().push(entitlement);
        }

        let mut findings = Vec::new();
        for (user_id, entitlements) in by_user {
            findings.extend(self.findings_for_user(ctx, user_id, &entitlements));
        }
        Ok(findings)
    }
}

impl DuplicateBilling {
    fn findings_for_user(
        &self,
        ctx: &DetectorContext,
        user_id: Uuid,
        entitlements: &[Entitlement],
    ) -> Vec<DetectedIssue> {
        let mut by_family: HashMap<String, Vec<&Entitlement>> = HashMap::new();
        for entitlement in entitlements {
            if !entitlement.state.grants_access() {
                continue;
            }
            let family = product_family(ctx.config, &entitlement.product_id);
            by_family.entry(family).or_default().push(entitlement);
        }

        let mut findings = Vec::new();
        for (family, conflict) in by_family {
            if conflict.len() < 2 {
                continue;
            }
            // Paying twice for one family; the duplicate side is the
            // recoverable revenue
            let amounts: Vec<Option<i64>> = conflict
                .iter()
                .map(|e| {
                    queries::events::get(ctx.conn, e.last_event_id)
                        .ok()
                        .flatten()
                        .and_then(|ev| ev.amount_cents)
                })
                .collect();
            let estimated = amounts.iter().flatten().min().copied();

            let sources: Vec<&str> = conflict.iter().map(|e| e.source.as_str()).collect();
            let products: Vec<&str> = conflict.iter().map(|e| e.product_id.as_str()).collect();

            findings.push(DetectedIssue {
                issue_type: "duplicate_billing".to_string(),
                severity: self.default_severity(),
                user_id: Some(user_id),
                title: format!("Duplicate billing for {}", family),
                description: format!(
                    "User holds {} concurrent paid entitlements for `{}` across: {}.",
                    conflict.len(),
                    family,
                    sources.join(", ")
                ),
                estimated_revenue_cents: estimated,
                confidence: None,
                evidence: json!({
                    "family": family,
                    "sources": sources,
                    "products": products,
                    "amountsCents": amounts,
                }),
                tier: self.tier(),
                dedup_key: format!("duplicate_billing:{}:{}", user_id, family),
            });
        }
        findings
    }
}

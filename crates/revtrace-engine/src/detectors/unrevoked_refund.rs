use serde_json::json;

use revtrace_store::queries;
use revtrace_types::{
    CanonicalEvent, DetectedIssue, DetectionTier, DetectorCategory, DetectorScope, EventType,
    IssueSeverity,
};

use crate::detector::{Detector, DetectorContext};
use crate::Result;

/// A refund landed but the entitlement still grants access: the user got
/// their money back and kept the product.
pub struct UnrevokedRefund;

impl Detector for UnrevokedRefund {
    fn id(&self) -> &'static str {
        "unrevoked_refund"
    }

    fn category(&self) -> DetectorCategory {
        DetectorCategory::RevenueProtection
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

    /// Purely inline: the situation is only decidable at the moment the
    /// refund lands against the current entitlement
    fn supports_scheduled_scan(&self) -> bool {
        false
    }

    fn check_event(
        &self,
        ctx: &DetectorContext,
        event: &CanonicalEvent,
    ) -> Result<Vec<DetectedIssue>> {
        if event.event_type != EventType::Refund {
            return Ok(Vec::new());
        }
        let Some(user_id) = event.user_id else {
            return Ok(Vec::new());
        };
        let Some(product_key) = event
            .product_id
            .clone()
            .or_else(|| event.external_subscription_id.clone())
        else {
            return Ok(Vec::new());
        };

        let Some(entitlement) =
            queries::entitlements::get(ctx.conn, event.org_id, user_id, event.source, &product_key)?
        else {
            return Ok(Vec::new());
        };

        if !entitlement.state.grants_access() {
            return Ok(Vec::new());
        }

        Ok(vec![DetectedIssue {
            issue_type: "unrevoked_refund".to_string(),
            severity: self.default_severity(),
            user_id: Some(user_id),
            title: format!("Refund not revoked for {}", product_key),
            description: format!(
                "A {} refund was processed but the {} entitlement is still `{}`.",
                event.source,
                product_key,
                entitlement.state
            ),
            estimated_revenue_cents: event.amount_cents,
            confidence: None,
            evidence: json!({
                "eventId": event.id,
                "source": event.source.as_str(),
                "product": product_key,
                "entitlementState": entitlement.state.as_str(),
                "refundAmountCents": event.amount_cents,
            }),
            tier: self.tier(),
            dedup_key: format!("unrevoked_refund:{}:{}", user_id, product_key),
        }])
    }
}

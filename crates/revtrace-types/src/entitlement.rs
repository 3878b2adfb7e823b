use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::event::Source;

/// Projected access state for one `(user, source, product)` tuple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementState {
    Trial,
    Active,
    GracePeriod,
    BillingRetry,
    PastDue,
    Paused,
    OnHold,
    Expired,
    Canceled,
    Revoked,
    Refunded,
}

impl EntitlementState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntitlementState::Trial => "trial",
            EntitlementState::Active => "active",
            EntitlementState::GracePeriod => "grace_period",
            EntitlementState::BillingRetry => "billing_retry",
            EntitlementState::PastDue => "past_due",
            EntitlementState::Paused => "paused",
            EntitlementState::OnHold => "on_hold",
            EntitlementState::Expired => "expired",
            EntitlementState::Canceled => "canceled",
            EntitlementState::Revoked => "revoked",
            EntitlementState::Refunded => "refunded",
        }
    }

    /// States that grant (or are presumed to still grant) access.
    /// Duplicate-billing and unrevoked-refund detection key off this set.
    pub fn grants_access(&self) -> bool {
        matches!(
            self,
            EntitlementState::Trial
                | EntitlementState::Active
                | EntitlementState::GracePeriod
                | EntitlementState::BillingRetry
        )
    }

    /// Terminal states a purchase can resurrect from
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            EntitlementState::Expired
                | EntitlementState::Canceled
                | EntitlementState::Revoked
                | EntitlementState::Refunded
        )
    }
}

impl std::str::FromStr for EntitlementState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trial" => Ok(EntitlementState::Trial),
            "active" => Ok(EntitlementState::Active),
            "grace_period" => Ok(EntitlementState::GracePeriod),
            "billing_retry" => Ok(EntitlementState::BillingRetry),
            "past_due" => Ok(EntitlementState::PastDue),
            "paused" => Ok(EntitlementState::Paused),
            "on_hold" => Ok(EntitlementState::OnHold),
            "expired" => Ok(EntitlementState::Expired),
            "canceled" => Ok(EntitlementState::Canceled),
            "revoked" => Ok(EntitlementState::Revoked),
            "refunded" => Ok(EntitlementState::Refunded),
            other => Err(Error::Parse(format!("unknown entitlement state: {}", other))),
        }
    }
}

impl std::fmt::Display for EntitlementState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The projected access record; mutated in place per projection step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entitlement {
    pub id: Uuid,
    pub org_id: Uuid,
    pub user_id: Uuid,
    pub source: Source,
    /// Product id, or the external subscription id standing in for it when
    /// the provider never names a product
    pub product_id: String,
    pub state: EntitlementState,
    /// Set by a cancellation that takes effect at period end
    pub will_cancel: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_period_start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_period_end: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_subscription_id: Option<String>,
    /// Last canonical event folded into this row
    pub last_event_id: Uuid,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_states() {
        assert!(EntitlementState::Active.grants_access());
        assert!(EntitlementState::Trial.grants_access());
        assert!(EntitlementState::GracePeriod.grants_access());
        assert!(EntitlementState::BillingRetry.grants_access());
        assert!(!EntitlementState::Refunded.grants_access());
        assert!(!EntitlementState::Paused.grants_access());
    }

    #[test]
    fn closed_states() {
        assert!(EntitlementState::Expired.is_closed());
        assert!(EntitlementState::Refunded.is_closed());
        assert!(!EntitlementState::Active.is_closed());
        assert!(!EntitlementState::Paused.is_closed());
    }
}

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use revtrace_types::{CanonicalEvent, EventStatus, EventType, Source};

/// Fanout suffix distinguishing the canonical events a single raw delivery
/// expands into. One-event mappings carry no suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanoutSuffix {
    Cancel,
    PriceChange,
    PlanChange,
}

impl FanoutSuffix {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cancel => "cancel",
            Self::PriceChange => "price_change",
            Self::PlanChange => "plan_change",
        }
    }
}

/// Builds canonical events for one raw delivery: owns the idempotency-key
/// scheme (`{source}:{provider_event_id}[:{suffix}]`) and the deterministic
/// UUIDv5 event ids derived from it
pub struct EventBuilder {
    org_id: Uuid,
    source: Source,
    provider_event_id: String,
    source_event_type: String,
    event_time: DateTime<Utc>,
    raw_payload: Value,
}

impl EventBuilder {
    pub fn new(
        org_id: Uuid,
        source: Source,
        provider_event_id: impl Into<String>,
        source_event_type: impl Into<String>,
        event_time: DateTime<Utc>,
        raw_payload: Value,
    ) -> Self {
        Self {
            org_id,
            source,
            provider_event_id: provider_event_id.into(),
            source_event_type: source_event_type.into(),
            event_time,
            raw_payload,
        }
    }

    pub fn idempotency_key(&self, suffix: Option<FanoutSuffix>) -> String {
        match suffix {
            Some(suffix) => format!(
                "{}:{}:{}",
                self.source.as_str(),
                self.provider_event_id,
                suffix.as_str()
            ),
            None => format!("{}:{}", self.source.as_str(), self.provider_event_id),
        }
    }

    /// Skeleton event; mappers fill enrichment fields on the returned value
    pub fn event(
        &self,
        event_type: EventType,
        status: EventStatus,
        suffix: Option<FanoutSuffix>,
    ) -> CanonicalEvent {
        let idempotency_key = self.idempotency_key(suffix);
        CanonicalEvent {
            id: CanonicalEvent::id_for(self.org_id, &idempotency_key),
            org_id: self.org_id,
            source: self.source,
            event_type,
            source_event_type: Some(self.source_event_type.clone()),
            status,
            event_time: self.event_time,
            ingested_at: Utc::now(),
            amount_cents: None,
            currency: None,
            external_subscription_id: None,
            product_id: None,
            plan_tier: None,
            billing_interval: None,
            trial_started_at: None,
            period_start: None,
            period_end: None,
            user_id: None,
            idempotency_key,
            raw_payload: self.raw_payload.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn idempotency_keys() {
        let builder = EventBuilder::new(
            Uuid::new_v4(),
            Source::Stripe,
            "evt_1",
            "customer.subscription.updated",
            Utc::now(),
            json!({}),
        );
        assert_eq!(builder.idempotency_key(None), "stripe:evt_1");
        assert_eq!(
            builder.idempotency_key(Some(FanoutSuffix::Cancel)),
            "stripe:evt_1:cancel"
        );
        assert_eq!(
            builder.idempotency_key(Some(FanoutSuffix::PlanChange)),
            "stripe:evt_1:plan_change"
        );
    }

    #[test]
    fn fanout_events_get_distinct_deterministic_ids() {
        let org = Uuid::new_v4();
        let builder = EventBuilder::new(
            org,
            Source::Stripe,
            "evt_1",
            "customer.subscription.updated",
            Utc::now(),
            json!({}),
        );
        let cancel = builder.event(
            EventType::Cancellation,
            EventStatus::Success,
            Some(FanoutSuffix::Cancel),
        );
        let downgrade = builder.event(
            EventType::Downgrade,
            EventStatus::Success,
            Some(FanoutSuffix::PlanChange),
        );
        assert_ne!(cancel.id, downgrade.id);
        assert_eq!(cancel.id, CanonicalEvent::id_for(org, "stripe:evt_1:cancel"));
    }
}

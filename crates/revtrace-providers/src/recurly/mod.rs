mod models;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use revtrace_types::{
    CanonicalEvent, EventStatus, EventType, IdType, IdentityHint, Source,
    derive_billing_interval,
};

use crate::builder::{EventBuilder, FanoutSuffix};
use crate::enrich::pick_money;
use crate::signature::{check_replay_window, verify_hmac_sha256_hex};
use crate::traits::{EventDescriptor, Normalizer, RawDelivery};
use crate::{Error, Result};

use models::{RecurlyNotification, RecurlySubscription};

/// Recurly webhooks: JSON notifications signed with
/// `recurly-signature: {t_millis},{hex hmac_sha256(secret, "{t}.{body}")}`
pub struct RecurlyNormalizer;

impl RecurlyNormalizer {
    fn parse(&self, raw: &RawDelivery) -> Result<RecurlyNotification> {
        serde_json::from_str(&raw.body)
            .map_err(|e| Error::Parse(format!("recurly notification: {}", e)))
    }

    fn event_time(&self, notification: &RecurlyNotification, raw: &RawDelivery) -> Result<DateTime<Utc>> {
        match notification.occurred_at.as_deref() {
            Some(occurred_at) => DateTime::parse_from_rfc3339(occurred_at)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|e| Error::Parse(format!("bad occurred_at: {}", e))),
            None => Ok(raw.received_at),
        }
    }
}

impl Normalizer for RecurlyNormalizer {
    fn source(&self) -> Source {
        Source::Recurly
    }

    fn verify_signature(&self, raw: &RawDelivery, secret: &str) -> Result<()> {
        let header = raw
            .header("recurly-signature")
            .ok_or_else(|| Error::Signature("missing recurly-signature header".to_string()))?;

        let (timestamp, signature) = header
            .split_once(',')
            .ok_or_else(|| Error::Signature("malformed recurly-signature header".to_string()))?;
        let timestamp_ms: i64 = timestamp
            .trim()
            .parse()
            .map_err(|_| Error::Signature("invalid timestamp format".to_string()))?;

        check_replay_window(timestamp_ms / 1000, raw.received_at)?;

        let signed_payload = format!("{}.{}", timestamp.trim(), raw.body);
        verify_hmac_sha256_hex(secret, &signed_payload, signature.trim())
    }

    fn normalize(&self, org_id: Uuid, raw: &RawDelivery) -> Result<Vec<CanonicalEvent>> {
        let notification = self.parse(raw)?;

        let (event_type, status, suffix) = match notification.event_type.as_str() {
            "new_subscription" => (EventType::Purchase, EventStatus::Success, None),
            "renewed_subscription" | "successful_payment" => {
                (EventType::Renewal, EventStatus::Success, None)
            }
            "canceled_subscription" => (EventType::Cancellation, EventStatus::Success, None),
            "expired_subscription" => (EventType::Expiration, EventStatus::Success, None),
            "refunded_transaction" => (EventType::Refund, EventStatus::Refunded, None),
            "failed_payment" => (EventType::BillingRetry, EventStatus::Failed, None),
            "subscription_paused" => (EventType::Pause, EventStatus::Success, None),
            "subscription_resumed" | "reactivated_subscription" => {
                (EventType::Resume, EventStatus::Success, None)
            }
            "updated_subscription" => {
                match plan_delta(notification.subscription.as_ref()) {
                    Some(delta) => delta,
                    None => return Ok(Vec::new()),
                }
            }
            _ => return Ok(Vec::new()),
        };

        let raw_json: serde_json::Value = serde_json::from_str(&raw.body)?;
        let builder = EventBuilder::new(
            org_id,
            Source::Recurly,
            &notification.id,
            &notification.event_type,
            self.event_time(&notification, raw)?,
            raw_json,
        );

        let mut ev = builder.event(event_type, status, suffix);

        let transaction_money = notification
            .transaction
            .as_ref()
            .and_then(|tx| tx.amount_in_cents.zip(tx.currency.clone()));
        let subscription_money = notification
            .subscription
            .as_ref()
            .and_then(|sub| sub.unit_amount_in_cents.zip(sub.currency.clone()));
        let (amount, currency) = pick_money(transaction_money, None, subscription_money);
        ev.amount_cents = amount;
        ev.currency = currency;

        if let Some(sub) = &notification.subscription {
            ev.external_subscription_id = sub.uuid.clone();
            if let Some(plan) = &sub.plan {
                ev.product_id = plan.code.clone();
                ev.plan_tier = plan.name.clone().or_else(|| plan.code.clone());
                if let (Some(length), Some(unit)) = (plan.interval_length, plan.interval_unit.as_deref())
                {
                    ev.billing_interval = Some(derive_billing_interval(length, unit));
                }
            }
            ev.period_start = parse_opt_rfc3339(sub.current_period_started_at.as_deref())?;
            ev.period_end = parse_opt_rfc3339(sub.current_period_ends_at.as_deref())?;
            ev.trial_started_at = parse_opt_rfc3339(sub.trial_started_at.as_deref())?;
        }

        Ok(vec![ev])
    }

    fn extract_identity_hints(&self, raw: &RawDelivery) -> Result<Vec<IdentityHint>> {
        let notification = self.parse(raw)?;
        let mut hints = Vec::new();

        if let Some(account) = &notification.account {
            if let Some(code) = &account.account_code {
                hints.push(IdentityHint::new(Source::Recurly, IdType::AccountCode, code));
            }
            if let Some(email) = &account.email {
                hints.push(IdentityHint::new(Source::Recurly, IdType::Email, email));
            }
        }
        if let Some(uuid) = notification.subscription.as_ref().and_then(|s| s.uuid.as_ref()) {
            hints.push(IdentityHint::new(
                Source::Recurly,
                IdType::SubscriptionId,
                uuid,
            ));
        }
        Ok(hints)
    }

    fn describe(&self, raw: &RawDelivery) -> Result<EventDescriptor> {
        let notification = self.parse(raw)?;
        Ok(EventDescriptor {
            external_event_id: Some(notification.id.clone()),
            source_event_type: Some(notification.event_type.clone()),
        })
    }
}

/// Upgrade/downgrade from the previous-plan fields on `updated_subscription`;
/// a payload without a price delta has no actionable meaning
fn plan_delta(
    sub: Option<&RecurlySubscription>,
) -> Option<(EventType, EventStatus, Option<FanoutSuffix>)> {
    let sub = sub?;
    let current = sub.unit_amount_in_cents?;
    let previous = sub.previous_unit_amount_in_cents?;
    if current == previous {
        return None;
    }

    let plan_changed = match (&sub.previous_plan_code, &sub.plan) {
        (Some(prev_code), Some(plan)) => plan.code.as_deref() != Some(prev_code.as_str()),
        _ => false,
    };
    let suffix = if plan_changed {
        FanoutSuffix::PlanChange
    } else {
        FanoutSuffix::PriceChange
    };

    let event_type = if current > previous {
        EventType::Upgrade
    } else {
        EventType::Downgrade
    };
    Some((event_type, EventStatus::Success, Some(suffix)))
}

fn parse_opt_rfc3339(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| {
        DateTime::parse_from_rfc3339(s)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|e| Error::Parse(format!("bad timestamp {:?}: {}", s, e)))
    })
    .transpose()
}

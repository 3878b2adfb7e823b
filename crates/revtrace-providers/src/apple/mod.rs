mod models;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use revtrace_types::{
    CanonicalEvent, EventStatus, EventType, IdType, IdentityHint, Source,
};

use crate::builder::EventBuilder;
use crate::jws::{check_es256_header, decode_jws};
use crate::signature::check_replay_window;
use crate::traits::{EventDescriptor, Normalizer, RawDelivery};
use crate::{Error, Result};

use models::{AppleEnvelope, AppleNotification, AppleTransaction};

/// App Store Server Notifications V2: a JWS envelope whose payload embeds a
/// second JWS with the transaction. Verification is structural (ES256 +
/// certificate chain present) plus the signedDate replay window; chain
/// validation against Apple roots sits in front of the service.
pub struct AppleNormalizer;

fn millis_ts(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| Error::Parse(format!("timestamp out of range: {}", millis)))
}

impl AppleNormalizer {
    fn decode_notification(&self, raw: &RawDelivery) -> Result<AppleNotification> {
        let envelope: AppleEnvelope = serde_json::from_str(&raw.body)
            .map_err(|e| Error::Parse(format!("apple envelope: {}", e)))?;
        let parts = decode_jws(&envelope.signed_payload)?;
        serde_json::from_value(parts.payload)
            .map_err(|e| Error::Parse(format!("apple notification payload: {}", e)))
    }

    fn decode_transaction(
        &self,
        notification: &AppleNotification,
    ) -> Result<Option<AppleTransaction>> {
        let Some(token) = notification
            .data
            .as_ref()
            .and_then(|data| data.signed_transaction_info.as_deref())
        else {
            return Ok(None);
        };
        let parts = decode_jws(token)?;
        let transaction = serde_json::from_value(parts.payload)
            .map_err(|e| Error::Parse(format!("apple transaction payload: {}", e)))?;
        Ok(Some(transaction))
    }
}

impl Normalizer for AppleNormalizer {
    fn source(&self) -> Source {
        Source::AppleAppStore
    }

    fn verify_signature(&self, raw: &RawDelivery, _secret: &str) -> Result<()> {
        let envelope: AppleEnvelope = serde_json::from_str(&raw.body)
            .map_err(|e| Error::Signature(format!("apple envelope: {}", e)))?;
        let parts = decode_jws(&envelope.signed_payload)?;
        check_es256_header(&parts.header)?;

        let signed_date = parts
            .payload
            .get("signedDate")
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| Error::Signature("missing signedDate".to_string()))?;
        check_replay_window(signed_date / 1000, raw.received_at)
    }

    fn normalize(&self, org_id: Uuid, raw: &RawDelivery) -> Result<Vec<CanonicalEvent>> {
        let notification = self.decode_notification(raw)?;
        let transaction = self.decode_transaction(&notification)?;

        let (event_type, status) = match (
            notification.notification_type.as_str(),
            notification.subtype.as_deref(),
        ) {
            ("SUBSCRIBED", _) => (EventType::Purchase, EventStatus::Success),
            ("DID_RENEW", _) => (EventType::Renewal, EventStatus::Success),
            ("DID_CHANGE_RENEWAL_STATUS", Some("AUTO_RENEW_DISABLED")) => {
                (EventType::Cancellation, EventStatus::Success)
            }
            ("DID_CHANGE_RENEWAL_STATUS", Some("AUTO_RENEW_ENABLED")) => {
                (EventType::Resume, EventStatus::Success)
            }
            ("EXPIRED", _) | ("GRACE_PERIOD_EXPIRED", _) => {
                (EventType::Expiration, EventStatus::Success)
            }
            ("REFUND", _) => (EventType::Refund, EventStatus::Refunded),
            ("DID_FAIL_TO_RENEW", _) => (EventType::BillingRetry, EventStatus::Failed),
            ("DID_CHANGE_RENEWAL_PREF", Some("UPGRADE")) => {
                (EventType::Upgrade, EventStatus::Success)
            }
            ("DID_CHANGE_RENEWAL_PREF", Some("DOWNGRADE")) => {
                (EventType::Downgrade, EventStatus::Success)
            }
            _ => return Ok(Vec::new()),
        };

        let event_time = match notification.signed_date {
            Some(ms) => millis_ts(ms)?,
            None => raw.received_at,
        };

        let raw_json: serde_json::Value = serde_json::from_str(&raw.body)?;
        let builder = EventBuilder::new(
            org_id,
            Source::AppleAppStore,
            &notification.notification_uuid,
            notification.type_label(),
            event_time,
            raw_json,
        );

        let mut ev = builder.event(event_type, status, None);
        if let Some(tx) = &transaction {
            ev.amount_cents = tx.price_cents();
            ev.currency = tx.currency.as_deref().map(str::to_uppercase);
            ev.external_subscription_id = tx.original_transaction_id.clone();
            ev.product_id = tx.product_id.clone();
            if let Some(purchase) = tx.purchase_date {
                ev.period_start = Some(millis_ts(purchase)?);
            }
            if let Some(expires) = tx.expires_date {
                ev.period_end = Some(millis_ts(expires)?);
            }
        }
        Ok(vec![ev])
    }

    fn extract_identity_hints(&self, raw: &RawDelivery) -> Result<Vec<IdentityHint>> {
        let notification = self.decode_notification(raw)?;
        let Some(tx) = self.decode_transaction(&notification)? else {
            return Ok(Vec::new());
        };

        let mut hints = Vec::new();
        if let Some(original) = &tx.original_transaction_id {
            hints.push(IdentityHint::new(
                Source::AppleAppStore,
                IdType::SubscriptionId,
                original,
            ));
        }
        if let Some(token) = &tx.app_account_token {
            hints.push(IdentityHint::new(
                Source::AppleAppStore,
                IdType::AppUserId,
                token,
            ));
        }
        Ok(hints)
    }

    fn describe(&self, raw: &RawDelivery) -> Result<EventDescriptor> {
        let notification = self.decode_notification(raw)?;
        Ok(EventDescriptor {
            external_event_id: Some(notification.notification_uuid.clone()),
            source_event_type: Some(notification.type_label()),
        })
    }
}

mod models;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use revtrace_types::{CanonicalEvent, EventStatus, EventType, IdType, IdentityHint, Source};

use crate::builder::EventBuilder;
use crate::signature::{check_replay_window, constant_time_token_eq};
use crate::traits::{EventDescriptor, Normalizer, RawDelivery};
use crate::{Error, Result};

use models::{DeveloperNotification, PubSubEnvelope, notification_type_name};

/// Google Play Real-time Developer Notifications, delivered as Pub/Sub push.
/// Authenticity rides on the shared push token in the Authorization header;
/// freshness on the Pub/Sub publish time.
pub struct GoogleNormalizer;

impl GoogleNormalizer {
    fn parse_envelope(&self, raw: &RawDelivery) -> Result<PubSubEnvelope> {
        serde_json::from_str(&raw.body)
            .map_err(|e| Error::Parse(format!("pubsub envelope: {}", e)))
    }

    fn decode_notification(&self, envelope: &PubSubEnvelope) -> Result<DeveloperNotification> {
        let bytes = STANDARD
            .decode(&envelope.message.data)
            .map_err(|e| Error::Parse(format!("pubsub data is not base64: {}", e)))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::Parse(format!("developer notification: {}", e)))
    }

    fn event_time(
        &self,
        notification: &DeveloperNotification,
        raw: &RawDelivery,
    ) -> Result<DateTime<Utc>> {
        match notification.event_time_millis.as_deref() {
            Some(millis) => {
                let millis: i64 = millis
                    .parse()
                    .map_err(|_| Error::Parse(format!("bad eventTimeMillis: {}", millis)))?;
                DateTime::<Utc>::from_timestamp_millis(millis)
                    .ok_or_else(|| Error::Parse(format!("timestamp out of range: {}", millis)))
            }
            None => Ok(raw.received_at),
        }
    }
}

impl Normalizer for GoogleNormalizer {
    fn source(&self) -> Source {
        Source::GooglePlay
    }

    fn verify_signature(&self, raw: &RawDelivery, secret: &str) -> Result<()> {
        let auth = raw
            .header("authorization")
            .ok_or_else(|| Error::Signature("missing Authorization header".to_string()))?;
        let token = auth
            .strip_prefix("Bearer ")
            .ok_or_else(|| Error::Signature("Authorization is not a bearer token".to_string()))?;
        if !constant_time_token_eq(secret, token) {
            return Err(Error::Signature("push token mismatch".to_string()));
        }

        let envelope: PubSubEnvelope = serde_json::from_str(&raw.body)
            .map_err(|e| Error::Signature(format!("pubsub envelope: {}", e)))?;
        let publish_time = envelope
            .message
            .publish_time
            .as_deref()
            .ok_or_else(|| Error::Signature("missing publishTime".to_string()))?;
        let published = DateTime::parse_from_rfc3339(publish_time)
            .map_err(|e| Error::Signature(format!("bad publishTime: {}", e)))?
            .with_timezone(&Utc);
        check_replay_window(published.timestamp(), raw.received_at)
    }

    fn normalize(&self, org_id: Uuid, raw: &RawDelivery) -> Result<Vec<CanonicalEvent>> {
        let envelope = self.parse_envelope(raw)?;
        let notification = self.decode_notification(&envelope)?;

        let Some(sub) = &notification.subscription_notification else {
            // Voided-purchase and one-time-product notifications have no
            // subscription meaning here
            return Ok(Vec::new());
        };

        let (event_type, status) = match sub.notification_type {
            4 => (EventType::Purchase, EventStatus::Success),
            1 | 2 => (EventType::Renewal, EventStatus::Success),
            3 => (EventType::Cancellation, EventStatus::Success),
            13 => (EventType::Expiration, EventStatus::Success),
            12 => (EventType::Refund, EventStatus::Refunded),
            5 | 6 => (EventType::BillingRetry, EventStatus::Failed),
            7 => (EventType::Resume, EventStatus::Success),
            10 => (EventType::Pause, EventStatus::Success),
            _ => return Ok(Vec::new()),
        };

        let raw_json: serde_json::Value = serde_json::from_str(&raw.body)?;
        let builder = EventBuilder::new(
            org_id,
            Source::GooglePlay,
            &envelope.message.message_id,
            notification_type_name(sub.notification_type),
            self.event_time(&notification, raw)?,
            raw_json,
        );

        let mut ev = builder.event(event_type, status, None);
        ev.external_subscription_id = sub.purchase_token.clone();
        ev.product_id = sub.subscription_id.clone();
        Ok(vec![ev])
    }

    fn extract_identity_hints(&self, raw: &RawDelivery) -> Result<Vec<IdentityHint>> {
        let envelope = self.parse_envelope(raw)?;
        let notification = self.decode_notification(&envelope)?;

        let mut hints = Vec::new();
        if let Some(sub) = &notification.subscription_notification
            && let Some(token) = &sub.purchase_token
        {
            hints.push(IdentityHint::new(
                Source::GooglePlay,
                IdType::SubscriptionId,
                token,
            ));
        }
        Ok(hints)
    }

    fn describe(&self, raw: &RawDelivery) -> Result<EventDescriptor> {
        let envelope = self.parse_envelope(raw)?;
        let notification = self.decode_notification(&envelope)?;
        let source_event_type = notification
            .subscription_notification
            .as_ref()
            .map(|sub| notification_type_name(sub.notification_type).to_string());
        Ok(EventDescriptor {
            external_event_id: Some(envelope.message.message_id.clone()),
            source_event_type,
        })
    }
}

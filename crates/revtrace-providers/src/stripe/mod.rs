mod mapper;
mod models;

use uuid::Uuid;

use revtrace_types::{CanonicalEvent, IdentityHint, Source};

use crate::signature::{check_replay_window, parse_kv_header, verify_hmac_sha256_hex};
use crate::traits::{EventDescriptor, Normalizer, RawDelivery};
use crate::{Error, Result};

use models::StripeEvent;

/// Stripe webhooks: JSON envelope, `Stripe-Signature` HMAC scheme
/// (`t=...,v1=hex(hmac_sha256(secret, "{t}.{body}"))`)
pub struct StripeNormalizer;

impl StripeNormalizer {
    fn parse(&self, raw: &RawDelivery) -> Result<StripeEvent> {
        serde_json::from_str(&raw.body)
            .map_err(|e| Error::Parse(format!("stripe envelope: {}", e)))
    }
}

impl Normalizer for StripeNormalizer {
    fn source(&self) -> Source {
        Source::Stripe
    }

    fn verify_signature(&self, raw: &RawDelivery, secret: &str) -> Result<()> {
        let header = raw
            .header("stripe-signature")
            .ok_or_else(|| Error::Signature("missing Stripe-Signature header".to_string()))?;

        let parts = parse_kv_header(header);
        let timestamp: i64 = parts
            .get("t")
            .ok_or_else(|| Error::Signature("missing timestamp in signature".to_string()))?
            .parse()
            .map_err(|_| Error::Signature("invalid timestamp format".to_string()))?;
        let expected = parts
            .get("v1")
            .ok_or_else(|| Error::Signature("missing v1 signature".to_string()))?;

        check_replay_window(timestamp, raw.received_at)?;

        let signed_payload = format!("{}.{}", timestamp, raw.body);
        verify_hmac_sha256_hex(secret, &signed_payload, expected)
    }

    fn normalize(&self, org_id: Uuid, raw: &RawDelivery) -> Result<Vec<CanonicalEvent>> {
        let event = self.parse(raw)?;
        let raw_json: serde_json::Value = serde_json::from_str(&raw.body)?;
        mapper::map_event(org_id, &event, &raw_json)
    }

    fn extract_identity_hints(&self, raw: &RawDelivery) -> Result<Vec<IdentityHint>> {
        let event = self.parse(raw)?;
        Ok(mapper::extract_hints(&event))
    }

    fn describe(&self, raw: &RawDelivery) -> Result<EventDescriptor> {
        let event = self.parse(raw)?;
        Ok(EventDescriptor {
            external_event_id: Some(event.id),
            source_event_type: Some(event.event_type),
        })
    }
}

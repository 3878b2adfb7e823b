use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use revtrace_types::{CanonicalEvent, IdentityHint, Source};

use crate::Result;

/// One inbound delivery as the receiver stored it: headers plus the exact
/// body bytes (as text), because HMAC schemes sign the raw body
#[derive(Debug, Clone)]
pub struct RawDelivery {
    pub headers: HashMap<String, String>,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

impl RawDelivery {
    pub fn new(headers: HashMap<String, String>, body: impl Into<String>) -> Self {
        Self {
            headers,
            body: body.into(),
            received_at: Utc::now(),
        }
    }

    /// Case-insensitive header lookup; providers disagree on casing
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// What the raw-log row records about a delivery even when it maps to zero
/// canonical events
#[derive(Debug, Clone, Default)]
pub struct EventDescriptor {
    pub external_event_id: Option<String>,
    pub source_event_type: Option<String>,
}

/// Webhook normalization capability, one implementation per billing provider
///
/// Responsibilities:
/// - Verify the provider-native signature scheme (with replay protection)
/// - Translate raw payloads into zero or more canonical events
/// - Surface identity hints so events converge on internal users
pub trait Normalizer: Send + Sync {
    /// Stable source identifier
    fn source(&self) -> Source;

    /// Provider-native HMAC / JWS check. Timestamps outside the ±5-minute
    /// window are rejected as replays. Errors with `Error::Signature`.
    fn verify_signature(&self, raw: &RawDelivery, secret: &str) -> Result<()>;

    /// Map one raw delivery to canonical events. A single payload may fan
    /// out (e.g. cancellation + downgrade); an event type with no actionable
    /// meaning yields an empty list, which is not an error.
    fn normalize(&self, org_id: Uuid, raw: &RawDelivery) -> Result<Vec<CanonicalEvent>>;

    /// Identity hints carried by the payload, in extraction order
    fn extract_identity_hints(&self, raw: &RawDelivery) -> Result<Vec<IdentityHint>>;

    /// Provider event id and native type for raw-log bookkeeping; returns
    /// what it can even for unmapped deliveries
    fn describe(&self, raw: &RawDelivery) -> Result<EventDescriptor>;
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Error;

/// Billing provider a delivery or event originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Stripe,
    AppleAppStore,
    GooglePlay,
    Recurly,
}

impl Source {
    pub const ALL: [Source; 4] = [
        Source::Stripe,
        Source::AppleAppStore,
        Source::GooglePlay,
        Source::Recurly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Stripe => "stripe",
            Source::AppleAppStore => "apple_app_store",
            Source::GooglePlay => "google_play",
            Source::Recurly => "recurly",
        }
    }
}

impl std::str::FromStr for Source {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stripe" => Ok(Source::Stripe),
            "apple_app_store" => Ok(Source::AppleAppStore),
            "google_play" => Ok(Source::GooglePlay),
            "recurly" => Ok(Source::Recurly),
            other => Err(Error::Parse(format!("unknown source: {}", other))),
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical event type. Providers map their native (sometimes composite)
/// event vocabulary onto this enum; anything without an actionable meaning
/// maps to nothing at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Purchase,
    Renewal,
    Cancellation,
    Expiration,
    Refund,
    Chargeback,
    BillingRetry,
    TrialConversion,
    Upgrade,
    Downgrade,
    Pause,
    Resume,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Purchase => "purchase",
            EventType::Renewal => "renewal",
            EventType::Cancellation => "cancellation",
            EventType::Expiration => "expiration",
            EventType::Refund => "refund",
            EventType::Chargeback => "chargeback",
            EventType::BillingRetry => "billing_retry",
            EventType::TrialConversion => "trial_conversion",
            EventType::Upgrade => "upgrade",
            EventType::Downgrade => "downgrade",
            EventType::Pause => "pause",
            EventType::Resume => "resume",
        }
    }
}

impl std::str::FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchase" => Ok(EventType::Purchase),
            "renewal" => Ok(EventType::Renewal),
            "cancellation" => Ok(EventType::Cancellation),
            "expiration" => Ok(EventType::Expiration),
            "refund" => Ok(EventType::Refund),
            "chargeback" => Ok(EventType::Chargeback),
            "billing_retry" => Ok(EventType::BillingRetry),
            "trial_conversion" => Ok(EventType::TrialConversion),
            "upgrade" => Ok(EventType::Upgrade),
            "downgrade" => Ok(EventType::Downgrade),
            "pause" => Ok(EventType::Pause),
            "resume" => Ok(EventType::Resume),
            other => Err(Error::Parse(format!("unknown event type: {}", other))),
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome recorded on the canonical event itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Success,
    Failed,
    Pending,
    Refunded,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Success => "success",
            EventStatus::Failed => "failed",
            EventStatus::Pending => "pending",
            EventStatus::Refunded => "refunded",
        }
    }
}

impl std::str::FromStr for EventStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(EventStatus::Success),
            "failed" => Ok(EventStatus::Failed),
            "pending" => Ok(EventStatus::Pending),
            "refunded" => Ok(EventStatus::Refunded),
            other => Err(Error::Parse(format!("unknown event status: {}", other))),
        }
    }
}

/// Terminal (or in-flight) status of a raw webhook delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Received,
    Queued,
    Processed,
    Skipped,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Received => "received",
            ProcessingStatus::Queued => "queued",
            ProcessingStatus::Processed => "processed",
            ProcessingStatus::Skipped => "skipped",
            ProcessingStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for ProcessingStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(ProcessingStatus::Received),
            "queued" => Ok(ProcessingStatus::Queued),
            "processed" => Ok(ProcessingStatus::Processed),
            "skipped" => Ok(ProcessingStatus::Skipped),
            "failed" => Ok(ProcessingStatus::Failed),
            other => Err(Error::Parse(format!("unknown processing status: {}", other))),
        }
    }
}

/// Canonical billing event
/// Maps 1:1 to a canonical_events table row; immutable once written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalEvent {
    /// Deterministic event ID (UUIDv5 of the idempotency key in the org namespace)
    pub id: Uuid,

    /// Owning organization
    pub org_id: Uuid,

    pub source: Source,

    pub event_type: EventType,

    /// The provider's native event type string, kept for traceability
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_event_type: Option<String>,

    pub status: EventStatus,

    /// When the event happened at the provider
    pub event_time: DateTime<Utc>,

    /// When the event entered the canonical store
    pub ingested_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_cents: Option<i64>,

    /// ISO currency code, normalized to uppercase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_subscription_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_tier: Option<String>,

    /// Derived interval: `month`, `year`, or `{length}_{unit}` for multi-unit plans
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_interval: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trial_started_at: Option<DateTime<Utc>>,

    /// Paid-period bounds carried by the provider payload; the projector
    /// overwrites the entitlement period from these when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_start: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_end: Option<DateTime<Utc>>,

    /// None until identity resolution runs (or forever, for events with no hints)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,

    /// `{source}:{provider_event_id}` plus a fanout suffix when one raw
    /// delivery yields several canonical events. Unique per org.
    pub idempotency_key: String,

    pub raw_payload: Value,
}

impl CanonicalEvent {
    /// Deterministic event id so replays and retries produce the same row
    pub fn id_for(org_id: Uuid, idempotency_key: &str) -> Uuid {
        Uuid::new_v5(&org_id, idempotency_key.as_bytes())
    }
}

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use revtrace_types::{ProcessingStatus, Source};

/// Tenant root; created externally, never mutated by the pipeline
#[derive(Debug, Clone)]
pub struct OrgRecord {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Credentials and configuration for one provider under one org.
/// `webhook_secret_enc` is the AES-GCM ciphertext (nonce-prefixed, hex).
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub id: Uuid,
    pub org_id: Uuid,
    pub source: Source,
    pub webhook_secret_enc: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Append-only record of one inbound delivery; kept for debugging and
/// never read on the hot path after processing
#[derive(Debug, Clone)]
pub struct RawWebhookRecord {
    pub id: Uuid,
    pub org_id: Uuid,
    pub source: Source,
    pub received_at: DateTime<Utc>,
    pub headers: Value,
    pub body: String,
    pub processing_status: ProcessingStatus,
    pub external_event_id: Option<String>,
    pub event_type: Option<String>,
    pub http_status: Option<i64>,
    pub error_message: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub attempts: i64,
}

/// Ledger row for one scheduled-scan execution
#[derive(Debug, Clone)]
pub struct DetectorRunRecord {
    pub id: Uuid,
    pub org_id: Uuid,
    pub detector_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub issues_created: i64,
    pub issues_updated: i64,
    pub error: Option<String>,
}

/// External alert channel configuration; the channel implementation itself
/// lives outside the core
#[derive(Debug, Clone)]
pub struct AlertConfigRecord {
    pub id: Uuid,
    pub org_id: Uuid,
    pub channel: String,
    pub max_per_window: i64,
    pub window_secs: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    RateLimited,
    Failed,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Sent => "sent",
            DeliveryOutcome::RateLimited => "rate_limited",
            DeliveryOutcome::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlertDeliveryRecord {
    pub id: Uuid,
    pub org_id: Uuid,
    pub alert_config_id: Uuid,
    pub issue_id: Uuid,
    pub outcome: DeliveryOutcome,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Connection-health snapshot assembled from the raw log counters
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConnectionHealth {
    pub source: Source,
    pub is_active: bool,
    pub last_received_at: Option<DateTime<Utc>>,
    pub deliveries_24h: i64,
    pub failures_24h: i64,
}

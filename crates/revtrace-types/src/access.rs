use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// App-side attestation that a user does or does not have access right now.
/// Append-only; recent rows feed the app_verified detector tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessCheck {
    pub id: Uuid,
    pub org_id: Uuid,
    /// Resolved lazily; stays None until an identity matching
    /// `external_user_ref` appears
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    pub external_user_ref: String,
    pub has_access: bool,
    pub observed_at: DateTime<Utc>,
    /// Free-form origin tag ("ios_sdk", "backend", ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_tag: Option<String>,
}

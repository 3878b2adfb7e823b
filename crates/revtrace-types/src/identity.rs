use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::event::Source;

/// Kind of external identifier carried by an identity hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdType {
    CustomerId,
    SubscriptionId,
    Email,
    AppUserId,
    AccountCode,
}

impl IdType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdType::CustomerId => "customer_id",
            IdType::SubscriptionId => "subscription_id",
            IdType::Email => "email",
            IdType::AppUserId => "app_user_id",
            IdType::AccountCode => "account_code",
        }
    }
}

impl std::str::FromStr for IdType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer_id" => Ok(IdType::CustomerId),
            "subscription_id" => Ok(IdType::SubscriptionId),
            "email" => Ok(IdType::Email),
            "app_user_id" => Ok(IdType::AppUserId),
            "account_code" => Ok(IdType::AccountCode),
            other => Err(Error::Parse(format!("unknown id type: {}", other))),
        }
    }
}

/// An `(source, id_type, external_id)` tuple extracted from a raw payload.
/// Hints form the edges of the identity graph; users are its connected
/// components, persisted directly as user ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityHint {
    pub source: Source,
    pub id_type: IdType,
    pub external_id: String,
}

impl IdentityHint {
    pub fn new(source: Source, id_type: IdType, external_id: impl Into<String>) -> Self {
        Self {
            source,
            id_type,
            external_id: external_id.into(),
        }
    }

    /// Comparison key used for identity lookups. Emails match
    /// case-insensitively and ignore surrounding whitespace; the original
    /// value is what gets stored.
    pub fn lookup_key(&self) -> String {
        match self.id_type {
            IdType::Email => email_key(&self.external_id),
            _ => self.external_id.clone(),
        }
    }
}

/// Normalized comparison key for an email address
pub fn email_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Internal subject an event stream converges on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub org_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One external identifier attached to a user; `(org, source, external_id)`
/// is unique across the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: Uuid,
    pub org_id: Uuid,
    pub user_id: Uuid,
    pub source: Source,
    pub external_id: String,
    pub id_type: IdType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_key_normalizes() {
        assert_eq!(email_key("  X@Y.com "), "x@y.com");
        assert_eq!(email_key("x@y.com"), "x@y.com");
    }

    #[test]
    fn email_hint_uses_normalized_lookup_key() {
        let hint = IdentityHint::new(Source::Stripe, IdType::Email, " User@Example.COM");
        assert_eq!(hint.lookup_key(), "user@example.com");
        assert_eq!(hint.external_id, " User@Example.COM");
    }

    #[test]
    fn customer_hint_keeps_exact_key() {
        let hint = IdentityHint::new(Source::Stripe, IdType::CustomerId, "cus_ABC");
        assert_eq!(hint.lookup_key(), "cus_ABC");
    }
}

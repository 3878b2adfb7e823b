use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Info,
    Warning,
    Critical,
}

impl IssueSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueSeverity::Critical => "critical",
            IssueSeverity::Warning => "warning",
            IssueSeverity::Info => "info",
        }
    }
}

impl std::str::FromStr for IssueSeverity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(IssueSeverity::Critical),
            "warning" => Ok(IssueSeverity::Warning),
            "info" => Ok(IssueSeverity::Info),
            other => Err(Error::Parse(format!("unknown severity: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Open,
    Acknowledged,
    Resolved,
    Dismissed,
}

impl IssueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::Open => "open",
            IssueStatus::Acknowledged => "acknowledged",
            IssueStatus::Resolved => "resolved",
            IssueStatus::Dismissed => "dismissed",
        }
    }

    /// Closed issues are immutable; a re-detected situation gets a new row
    pub fn is_closed(&self) -> bool {
        matches!(self, IssueStatus::Resolved | IssueStatus::Dismissed)
    }

    /// Legal transitions in the status lattice
    pub fn can_transition_to(&self, next: IssueStatus) -> bool {
        match self {
            IssueStatus::Open => matches!(
                next,
                IssueStatus::Acknowledged | IssueStatus::Resolved | IssueStatus::Dismissed
            ),
            IssueStatus::Acknowledged => {
                matches!(next, IssueStatus::Resolved | IssueStatus::Dismissed)
            }
            IssueStatus::Resolved | IssueStatus::Dismissed => false,
        }
    }
}

impl std::str::FromStr for IssueStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(IssueStatus::Open),
            "acknowledged" => Ok(IssueStatus::Acknowledged),
            "resolved" => Ok(IssueStatus::Resolved),
            "dismissed" => Ok(IssueStatus::Dismissed),
            other => Err(Error::Parse(format!("unknown issue status: {}", other))),
        }
    }
}

/// Tier-1 detectors rely on billing data alone; app_verified detectors
/// cross-reference app-side access checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionTier {
    Tier1,
    AppVerified,
}

impl DetectionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionTier::Tier1 => "tier1",
            DetectionTier::AppVerified => "app_verified",
        }
    }
}

impl std::str::FromStr for DetectionTier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tier1" => Ok(DetectionTier::Tier1),
            "app_verified" => Ok(DetectionTier::AppVerified),
            other => Err(Error::Parse(format!("unknown detection tier: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorCategory {
    IntegrationHealth,
    CrossPlatform,
    RevenueProtection,
    Verified,
}

impl DetectorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorCategory::IntegrationHealth => "integration_health",
            DetectorCategory::CrossPlatform => "cross_platform",
            DetectorCategory::RevenueProtection => "revenue_protection",
            DetectorCategory::Verified => "verified",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorScope {
    PerUser,
    Aggregate,
}

/// A detected problem with lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: Uuid,
    pub org_id: Uuid,
    pub detector_id: String,
    pub issue_type: String,
    pub severity: IssueSeverity,
    pub status: IssueStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_revenue_cents: Option<i64>,
    /// [0, 1]; Tier-2 detectors derive it from access-check evidence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Structured evidence bag, detector-specific
    pub evidence: Value,
    pub detection_tier: DetectionTier,
    /// Fingerprint of the *situation*; one open issue per (org, dedup_key)
    pub dedup_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

/// Detector output before the engine reconciles it against open issues
#[derive(Debug, Clone)]
pub struct DetectedIssue {
    pub issue_type: String,
    pub severity: IssueSeverity,
    pub user_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub estimated_revenue_cents: Option<i64>,
    pub confidence: Option<f64>,
    pub evidence: Value,
    pub tier: DetectionTier,
    pub dedup_key: String,
}

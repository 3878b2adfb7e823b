use std::collections::HashMap;
use std::time::Duration;

use rusqlite::Connection;
use uuid::Uuid;

use revtrace_types::{
    CanonicalEvent, DetectedIssue, DetectionTier, DetectorCategory, DetectorScope, IssueSeverity,
};

use crate::Result;

/// Tunables shared by the detector catalogue. Defaults match production;
/// tests override individual knobs.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Delivery-gap baseline clip, seconds
    pub gap_baseline_min_secs: i64,
    pub gap_baseline_max_secs: i64,
    /// Delivery-gap floor before any warning fires, seconds
    pub gap_floor_secs: i64,
    /// Baseline window for inter-arrival sampling, days
    pub gap_baseline_days: i64,
    /// Entitlements with no events for this many days count as stale
    pub freshness_days: i64,
    /// Stale fraction thresholds
    pub freshness_warning_fraction: f64,
    pub freshness_critical_fraction: f64,
    /// Minimum population before data-freshness speaks
    pub freshness_min_entitlements: usize,
    /// Renewal-anomaly drop thresholds, percent
    pub renewal_critical_drop: f64,
    pub renewal_warning_drop: f64,
    /// Grace window applied before an overdue period lapses, per-source
    /// override keyed by source string, hours
    pub grace_window_hours: i64,
    pub grace_window_overrides: HashMap<String, i64>,
    /// Access-check evidence lookback, hours
    pub access_check_lookback_hours: i64,
    /// Tier-2 issues auto-resolve after this long without fresh contradicting
    /// evidence, hours
    pub tier2_auto_resolve_hours: i64,
    /// product_id → family overrides consulted before the name heuristic
    pub product_aliases: HashMap<String, String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            gap_baseline_min_secs: 300,
            gap_baseline_max_secs: 7200,
            gap_floor_secs: 1800,
            gap_baseline_days: 7,
            freshness_days: 35,
            freshness_warning_fraction: 0.3,
            freshness_critical_fraction: 0.6,
            freshness_min_entitlements: 10,
            renewal_critical_drop: 60.0,
            renewal_warning_drop: 30.0,
            grace_window_hours: 16,
            grace_window_overrides: HashMap::new(),
            access_check_lookback_hours: 24,
            tier2_auto_resolve_hours: 72,
            product_aliases: HashMap::new(),
        }
    }
}

/// Everything a detector may touch. Detectors read through the connection
/// and return findings; the engine owns all issue writes.
pub struct DetectorContext<'a> {
    pub conn: &'a Connection,
    pub config: &'a DetectorConfig,
    pub now: chrono::DateTime<chrono::Utc>,
}

/// Pluggable rule that examines events and/or aggregate state and may raise
/// issues. Per-event detectors must stay bounded in cost: single-digit
/// round-trips through the context connection.
pub trait Detector: Send + Sync {
    fn id(&self) -> &'static str;
    fn category(&self) -> DetectorCategory;
    fn scope(&self) -> DetectorScope;
    fn tier(&self) -> DetectionTier;
    fn default_severity(&self) -> IssueSeverity;

    /// Scheduled-scan cadence; the scheduler skips a detector whose last run
    /// is younger than this
    fn scan_interval(&self) -> Duration {
        Duration::from_secs(300)
    }

    /// Whether the scheduler should drive this detector at all.
    /// Per-event-only detectors opt out so their ledger stays meaningful.
    fn supports_scheduled_scan(&self) -> bool {
        true
    }

    /// Inline check after one event commits and projects
    fn check_event(&self, _ctx: &DetectorContext, _event: &CanonicalEvent) -> Result<Vec<DetectedIssue>> {
        Ok(Vec::new())
    }

    /// Aggregate scan over one org
    fn scheduled_scan(&self, _ctx: &DetectorContext, _org_id: Uuid) -> Result<Vec<DetectedIssue>> {
        Ok(Vec::new())
    }
}

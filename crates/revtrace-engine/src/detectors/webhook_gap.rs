use chrono::Duration;
use serde_json::json;
use uuid::Uuid;

use revtrace_store::queries;
use revtrace_types::{
    DetectedIssue, DetectionTier, DetectorCategory, DetectorScope, IssueSeverity,
};

use crate::detector::{Detector, DetectorContext};
use crate::Result;

/// A source that normally delivers every few minutes has gone quiet.
///
/// Baseline is the median inter-arrival time over the trailing window,
/// clipped to a sane band. Warning past max(3·baseline, 30 min); critical
/// past max(6·baseline, 3 h) — the critical floor keeps the two thresholds
/// from collapsing onto each other at low baselines.
pub struct WebhookDeliveryGap;

impl Detector for WebhookDeliveryGap {
    fn id(&self) -> &'static str {
        "webhook_delivery_gap"
    }

    fn category(&self) -> DetectorCategory {
        DetectorCategory::IntegrationHealth
    }

    fn scope(&self) -> DetectorScope {
        DetectorScope::Aggregate
    }

    fn tier(&self) -> DetectionTier {
        DetectionTier::Tier1
    }

    fn default_severity(&self) -> IssueSeverity {
        IssueSeverity::Warning
    }

    fn scheduled_scan(&self, ctx: &DetectorContext, org_id: Uuid) -> Result<Vec<DetectedIssue>> {
        let mut findings = Vec::new();

        for connection in queries::connections::list_active(ctx.conn, org_id)? {
            let source = connection.source;
            let Some(last) = queries::events::last_event_time(ctx.conn, org_id, source)? else {
                continue;
            };

            let window_start = ctx.now - Duration::days(ctx.config.gap_baseline_days);
            let times = queries::events::event_times_since(ctx.conn, org_id, source, window_start)?;
            let Some(baseline_secs) = median_gap_secs(&times) else {
                continue;
            };
            let baseline_secs = baseline_secs
                .clamp(ctx.config.gap_baseline_min_secs, ctx.config.gap_baseline_max_secs);

            let gap_secs = (ctx.now - last).num_seconds();
            let warn_threshold = (3 * baseline_secs).max(ctx.config.gap_floor_secs);
            let critical_threshold = (6 * baseline_secs).max(6 * ctx.config.gap_floor_secs);

            let severity = if gap_secs > critical_threshold {
                IssueSeverity::Critical
            } else if gap_secs > warn_threshold {
                IssueSeverity::Warning
            } else {
                continue;
            };

            findings.push(DetectedIssue {
                issue_type: "webhook_delivery_gap".to_string(),
                severity,
                user_id: None,
                title: format!("No {} webhooks for {} minutes", source, gap_secs / 60),
                description: format!(
                    "{} normally delivers every ~{} minutes but nothing has arrived for {} minutes.",
                    source,
                    baseline_secs / 60,
                    gap_secs / 60
                ),
                estimated_revenue_cents: None,
                confidence: None,
                evidence: json!({
                    "source": source.as_str(),
                    "baselineSecs": baseline_secs,
                    "gapSecs": gap_secs,
                    "warnThresholdSecs": warn_threshold,
                    "criticalThresholdSecs": critical_threshold,
                    "lastEventAt": last.to_rfc3339(),
                }),
                tier: self.tier(),
                dedup_key: format!("webhook_delivery_gap:{}", source),
            });
        }

        Ok(findings)
    }
}

fn median_gap_secs(times: &[chrono::DateTime<chrono::Utc>]) -> Option<i64> {
    if times.len() < 2 {
        return None;
    }
    let mut gaps: Vec<i64> = times
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).num_seconds())
        .collect();
    gaps.sort_unstable();
    Some(gaps[gaps.len() / 2])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn median_of_regular_arrivals() {
        let base = Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap();
        let times: Vec<_> = (0..10).map(|i| base + Duration::minutes(10 * i)).collect();
        assert_eq!(median_gap_secs(&times), Some(600));
    }

    #[test]
    fn too_few_samples_yield_no_baseline() {
        let base = Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap();
        assert_eq!(median_gap_secs(&[base]), None);
        assert_eq!(median_gap_secs(&[]), None);
    }
}

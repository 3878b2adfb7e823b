use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use revtrace_engine::IssueTransition;
use revtrace_store::{AlertDeliveryRecord, DeliveryOutcome, queries};
use revtrace_types::{Issue, IssueStatus};

use crate::Result;

/// External alert channel. The core only pushes `{issue, previous_status}`
/// at it; retry policy belongs to the channel, not here.
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &'static str;
    fn deliver(&self, issue: &Issue, previous_status: Option<IssueStatus>) -> anyhow::Result<()>;
}

/// Default sink: structured log lines. Real channels (Slack, email) plug in
/// from outside the core.
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn name(&self) -> &'static str {
        "tracing"
    }

    fn deliver(&self, issue: &Issue, previous_status: Option<IssueStatus>) -> anyhow::Result<()> {
        tracing::info!(
            issue = %issue.id,
            issue_type = %issue.issue_type,
            severity = issue.severity.as_str(),
            status = issue.status.as_str(),
            previous = previous_status.map(|s| s.as_str()).unwrap_or("none"),
            "issue alert"
        );
        Ok(())
    }
}

/// Refill-on-check token bucket, one per alert config
struct TokenBucket {
    tokens: i64,
    window_started: DateTime<Utc>,
}

/// Routes issue transitions to the sink under per-config rate limits and
/// books every attempt into the delivery log.
pub struct AlertDispatcher {
    sink: Box<dyn AlertSink>,
    buckets: Mutex<HashMap<Uuid, TokenBucket>>,
}

impl AlertDispatcher {
    pub fn new(sink: Box<dyn AlertSink>) -> Self {
        Self {
            sink,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Deliver one transition through every active config of its org.
    /// A sink failure is recorded and swallowed: the issue transition that
    /// triggered the alert is never rolled back.
    pub fn dispatch(&self, conn: &Connection, transition: &IssueTransition) -> Result<()> {
        let issue = &transition.issue;
        let configs = queries::alerts::list_active_configs(conn, issue.org_id)?;

        for config in configs {
            let allowed = self.take_token(config.id, config.max_per_window, config.window_secs);

            let (outcome, detail) = if !allowed {
                (DeliveryOutcome::RateLimited, None)
            } else {
                match self.sink.deliver(issue, transition.previous_status) {
                    Ok(()) => (DeliveryOutcome::Sent, None),
                    Err(err) => {
                        tracing::warn!(
                            channel = %config.channel,
                            issue = %issue.id,
                            error = %err,
                            "alert delivery failed"
                        );
                        (DeliveryOutcome::Failed, Some(err.to_string()))
                    }
                }
            };

            queries::alerts::insert_delivery(
                conn,
                &AlertDeliveryRecord {
                    id: Uuid::new_v4(),
                    org_id: issue.org_id,
                    alert_config_id: config.id,
                    issue_id: issue.id,
                    outcome,
                    detail,
                    created_at: Utc::now(),
                },
            )?;
        }
        Ok(())
    }

    pub fn dispatch_all(&self, conn: &Connection, transitions: &[IssueTransition]) {
        for transition in transitions {
            if let Err(err) = self.dispatch(conn, transition) {
                tracing::warn!(error = %err, "alert dispatch failed");
            }
        }
    }

    fn take_token(&self, config_id: Uuid, max_per_window: i64, window_secs: i64) -> bool {
        let now = Utc::now();
        let mut buckets = match self.buckets.lock() {
            Ok(buckets) => buckets,
            Err(poisoned) => poisoned.into_inner(),
        };
        let bucket = buckets.entry(config_id).or_insert(TokenBucket {
            tokens: max_per_window,
            window_started: now,
        });

        if now - bucket.window_started >= Duration::seconds(window_secs) {
            bucket.tokens = max_per_window;
            bucket.window_started = now;
        }

        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revtrace_store::{AlertConfigRecord, Database, OrgRecord};
    use revtrace_types::{DetectionTier, IssueSeverity};

    fn make_issue(org_id: Uuid) -> Issue {
        Issue {
            id: Uuid::new_v4(),
            org_id,
            detector_id: "unrevoked_refund".to_string(),
            issue_type: "unrevoked_refund".to_string(),
            severity: IssueSeverity::Critical,
            status: IssueStatus::Open,
            user_id: None,
            title: "t".to_string(),
            description: "d".to_string(),
            estimated_revenue_cents: None,
            confidence: None,
            evidence: serde_json::json!({}),
            detection_tier: DetectionTier::Tier1,
            dedup_key: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            resolved_at: None,
            resolution: None,
        }
    }

    #[test]
    fn rate_limit_books_overflow_as_rate_limited() {
        let db = Database::open_in_memory().unwrap();
        let org = OrgRecord {
            id: Uuid::new_v4(),
            slug: "acme".to_string(),
            name: "Acme".to_string(),
            created_at: Utc::now(),
        };
        queries::orgs::insert(db.conn(), &org).unwrap();

        let config = AlertConfigRecord {
            id: Uuid::new_v4(),
            org_id: org.id,
            channel: "slack".to_string(),
            max_per_window: 2,
            window_secs: 300,
            is_active: true,
        };
        queries::alerts::insert_config(db.conn(), &config).unwrap();

        let dispatcher = AlertDispatcher::new(Box::new(TracingAlertSink));
        for _ in 0..3 {
            let transition = IssueTransition {
                issue: make_issue(org.id),
                previous_status: None,
            };
            dispatcher.dispatch(db.conn(), &transition).unwrap();
        }

        let sent = queries::alerts::count_deliveries_since(
            db.conn(),
            config.id,
            DeliveryOutcome::Sent,
            Utc::now() - Duration::hours(1),
        )
        .unwrap();
        let limited = queries::alerts::count_deliveries_since(
            db.conn(),
            config.id,
            DeliveryOutcome::RateLimited,
            Utc::now() - Duration::hours(1),
        )
        .unwrap();
        assert_eq!(sent, 2);
        assert_eq!(limited, 1);
    }

    #[test]
    fn sink_failure_is_booked_and_swallowed() {
        struct FailingSink;
        impl AlertSink for FailingSink {
            fn name(&self) -> &'static str {
                "failing"
            }
            fn deliver(&self, _: &Issue, _: Option<IssueStatus>) -> anyhow::Result<()> {
                anyhow::bail!("channel unreachable")
            }
        }

        let db = Database::open_in_memory().unwrap();
        let org = OrgRecord {
            id: Uuid::new_v4(),
            slug: "acme".to_string(),
            name: "Acme".to_string(),
            created_at: Utc::now(),
        };
        queries::orgs::insert(db.conn(), &org).unwrap();
        let config = AlertConfigRecord {
            id: Uuid::new_v4(),
            org_id: org.id,
            channel: "slack".to_string(),
            max_per_window: 5,
            window_secs: 300,
            is_active: true,
        };
        queries::alerts::insert_config(db.conn(), &config).unwrap();

        let dispatcher = AlertDispatcher::new(Box::new(FailingSink));
        let transition = IssueTransition {
            issue: make_issue(org.id),
            previous_status: None,
        };
        dispatcher.dispatch(db.conn(), &transition).unwrap();

        let failed = queries::alerts::count_deliveries_since(
            db.conn(),
            config.id,
            DeliveryOutcome::Failed,
            Utc::now() - Duration::hours(1),
        )
        .unwrap();
        assert_eq!(failed, 1);
    }
}

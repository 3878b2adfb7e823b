use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use revtrace_engine::{project_event, resolve_event_identity};
use revtrace_store::{Database, RawWebhookRecord, queries};
use revtrace_types::{ProcessingStatus, Source};

use crate::pipeline::PipelineDeps;
use crate::Result;

/// One historical payload to replay
#[derive(Debug, Clone)]
pub struct BackfillPayload {
    pub headers: HashMap<String, String>,
    pub body: String,
    pub received_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BackfillStats {
    pub deliveries: usize,
    pub events_inserted: usize,
    pub duplicates: usize,
    pub failed: usize,
}

/// Historical import: drives operator-supplied payloads through the same
/// normalizer path as live webhooks. Signature verification is skipped (the
/// payloads come from the operator, not the wire); idempotency keys make the
/// whole run safely repeatable.
pub struct BackfillDriver<'a> {
    deps: &'a PipelineDeps,
}

impl<'a> BackfillDriver<'a> {
    pub fn new(deps: &'a PipelineDeps) -> Self {
        Self { deps }
    }

    pub fn run(
        &self,
        db: &mut Database,
        org_id: Uuid,
        source: Source,
        payloads: impl IntoIterator<Item = BackfillPayload>,
    ) -> Result<BackfillStats> {
        let mut stats = BackfillStats::default();
        let normalizer = self.deps.registry.get(source)?;

        for payload in payloads {
            stats.deliveries += 1;
            let received_at = payload.received_at.unwrap_or_else(Utc::now);

            let raw = RawWebhookRecord {
                id: Uuid::new_v4(),
                org_id,
                source,
                received_at,
                headers: json!(payload.headers),
                body: payload.body.clone(),
                processing_status: ProcessingStatus::Received,
                external_event_id: None,
                event_type: None,
                http_status: None,
                error_message: None,
                processed_at: None,
                attempts: 0,
            };
            queries::raw_log::insert(db.conn(), &raw)?;

            let delivery = revtrace_providers::RawDelivery {
                headers: payload.headers,
                body: payload.body,
                received_at,
            };

            let events = match normalizer.normalize(org_id, &delivery) {
                Ok(events) => events,
                Err(err) => {
                    stats.failed += 1;
                    queries::raw_log::mark_failed(db.conn(), raw.id, &err.to_string())?;
                    continue;
                }
            };
            let hints = normalizer.extract_identity_hints(&delivery).unwrap_or_default();
            let descriptor = normalizer.describe(&delivery).unwrap_or_default();

            for mut event in events {
                if !queries::events::insert_if_absent(db.conn(), &event)? {
                    stats.duplicates += 1;
                    continue;
                }
                stats.events_inserted += 1;

                let resolution = resolve_event_identity(db, org_id, event.id, &hints)?;
                event.user_id = resolution.user_id();

                let outcome = project_event(db.conn(), &event)?;
                let mut transitions = self
                    .deps
                    .engine
                    .record_projection_conflict(db.conn(), &event, &outcome);
                transitions.extend(self.deps.engine.run_event_detectors(db.conn(), &event));
                self.deps.alerts.dispatch_all(db.conn(), &transitions);
            }

            queries::raw_log::mark_processed(
                db.conn(),
                raw.id,
                descriptor.external_event_id.as_deref(),
                descriptor.source_event_type.as_deref(),
            )?;
        }

        Ok(stats)
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use revtrace_engine::{DetectionEngine, project_event, resolve_event_identity};
use revtrace_providers::{RawDelivery, Registry};
use revtrace_store::{Database, queries};
use revtrace_types::ProcessingStatus;

use crate::access::AccessCheckService;
use crate::alerts::AlertDispatcher;
use crate::secrets::SecretCodec;
use crate::Result;

/// Everything a worker needs to take a raw delivery to its terminal status
pub struct PipelineDeps {
    pub registry: Arc<Registry>,
    pub engine: Arc<DetectionEngine>,
    pub secrets: SecretCodec,
    pub alerts: Arc<AlertDispatcher>,
    pub access: AccessCheckService,
}

/// Terminal classification of one delivery pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Normalized; counts cover this pass only
    Processed {
        events_inserted: usize,
        duplicates: usize,
    },
    /// Authentication failure or inactive connection; not retried
    Skipped(String),
    /// Terminal content failure; not retried
    Failed(String),
    /// Row already reached a terminal status (redelivered work item)
    AlreadyTerminal,
}

/// One full pipeline pass:
/// verify → normalize → insert → resolve identity → project → detect.
///
/// Content problems are terminal and handled here (row marked, `Ok`
/// returned); infrastructure problems bubble as `Err` so the worker can
/// retry with backoff.
pub fn process_delivery(
    db: &mut Database,
    deps: &PipelineDeps,
    raw_id: Uuid,
) -> Result<DeliveryOutcome> {
    let Some(raw) = queries::raw_log::get(db.conn(), raw_id)? else {
        return Ok(DeliveryOutcome::AlreadyTerminal);
    };
    if matches!(
        raw.processing_status,
        ProcessingStatus::Processed | ProcessingStatus::Skipped | ProcessingStatus::Failed
    ) {
        return Ok(DeliveryOutcome::AlreadyTerminal);
    }

    let Some(connection) = queries::connections::get(db.conn(), raw.org_id, raw.source)? else {
        let reason = "no billing connection for source";
        queries::raw_log::mark_skipped(db.conn(), raw_id, reason)?;
        return Ok(DeliveryOutcome::Skipped(reason.to_string()));
    };
    if !connection.is_active {
        let reason = "billing connection disabled";
        queries::raw_log::mark_skipped(db.conn(), raw_id, reason)?;
        return Ok(DeliveryOutcome::Skipped(reason.to_string()));
    }

    let secret = match deps.secrets.decrypt(&connection.webhook_secret_enc) {
        Ok(secret) => secret,
        Err(err) => {
            let message = format!("webhook secret unusable: {}", err);
            queries::raw_log::mark_failed(db.conn(), raw_id, &message)?;
            return Ok(DeliveryOutcome::Failed(message));
        }
    };

    let headers: HashMap<String, String> =
        serde_json::from_value(raw.headers.clone()).unwrap_or_default();
    let delivery = RawDelivery {
        headers,
        body: raw.body.clone(),
        received_at: raw.received_at,
    };

    let normalizer = match deps.registry.get(raw.source) {
        Ok(normalizer) => normalizer,
        Err(err) => {
            let message = err.to_string();
            queries::raw_log::mark_failed(db.conn(), raw_id, &message)?;
            return Ok(DeliveryOutcome::Failed(message));
        }
    };

    // Signature problems (including replays) are skips, visible in the log
    // for secret-misconfiguration diagnosis
    if let Err(err) = normalizer.verify_signature(&delivery, &secret) {
        let reason = err.to_string();
        queries::raw_log::mark_skipped(db.conn(), raw_id, &reason)?;
        return Ok(DeliveryOutcome::Skipped(reason));
    }

    let descriptor = match normalizer.describe(&delivery) {
        Ok(descriptor) => descriptor,
        Err(err) => {
            let message = err.to_string();
            queries::raw_log::mark_failed(db.conn(), raw_id, &message)?;
            return Ok(DeliveryOutcome::Failed(message));
        }
    };

    let events = match normalizer.normalize(raw.org_id, &delivery) {
        Ok(events) => events,
        Err(err) => {
            let message = err.to_string();
            queries::raw_log::mark_failed(db.conn(), raw_id, &message)?;
            return Ok(DeliveryOutcome::Failed(message));
        }
    };
    let hints = normalizer.extract_identity_hints(&delivery).unwrap_or_default();

    let mut events_inserted = 0;
    let mut duplicates = 0;

    // Fanout events project in emitted order, synchronously, so per-event
    // detectors observe the projection they follow
    for mut event in events {
        let is_new = queries::events::insert_if_absent(db.conn(), &event)?;
        if !is_new {
            duplicates += 1;
            continue;
        }
        events_inserted += 1;

        let resolution = resolve_event_identity(db, raw.org_id, event.id, &hints)?;
        event.user_id = resolution.user_id();

        if let Some(user_id) = resolution.user_id() {
            let refs: Vec<String> = hints
                .iter()
                .flat_map(|h| [h.external_id.clone(), h.lookup_key()])
                .collect();
            deps.access
                .replay_unresolved(db.conn(), raw.org_id, user_id, &refs)?;
        }

        let outcome = project_event(db.conn(), &event)?;
        let mut transitions = deps
            .engine
            .record_projection_conflict(db.conn(), &event, &outcome);
        transitions.extend(deps.engine.run_event_detectors(db.conn(), &event));
        deps.alerts.dispatch_all(db.conn(), &transitions);
    }

    queries::raw_log::mark_processed(
        db.conn(),
        raw_id,
        descriptor.external_event_id.as_deref(),
        descriptor.source_event_type.as_deref(),
    )?;

    Ok(DeliveryOutcome::Processed {
        events_inserted,
        duplicates,
    })
}

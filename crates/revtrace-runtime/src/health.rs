use chrono::{Duration, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use revtrace_store::{ConnectionHealth, queries};
use revtrace_types::ProcessingStatus;

use crate::Result;

/// Per-connection freshness snapshot: last delivery plus 24-hour counters.
/// Thin over the raw log; the webhook-gap detector is the alerting side of
/// the same signal.
pub fn connection_health(conn: &Connection, org_id: Uuid) -> Result<Vec<ConnectionHealth>> {
    let since = Utc::now() - Duration::hours(24);
    let mut report = Vec::new();

    for connection in queries::connections::list_active(conn, org_id)? {
        let source = connection.source;
        report.push(ConnectionHealth {
            source,
            is_active: connection.is_active,
            last_received_at: queries::raw_log::last_received_at(conn, org_id, source)?,
            deliveries_24h: queries::raw_log::count_since(conn, org_id, source, since, None)?,
            failures_24h: queries::raw_log::count_since(
                conn,
                org_id,
                source,
                since,
                Some(ProcessingStatus::Failed),
            )?,
        });
    }
    Ok(report)
}

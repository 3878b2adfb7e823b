use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use revtrace_types::{CanonicalEvent, EventStatus, EventType, Source};

use crate::db::{opt_ts, parse_opt_ts, parse_opt_uuid, parse_ts, parse_uuid, ts};
use crate::Result;

const SELECT_COLS: &str = "id, org_id, source, event_type, source_event_type, status, event_time, \
     ingested_at, amount_cents, currency, external_subscription_id, product_id, plan_tier, \
     billing_interval, trial_started_at, period_start, period_end, user_id, idempotency_key, raw_payload";

/// Insert under `(org, idempotency_key)` uniqueness. Returns true when the
/// row is new; a conflict is swallowed as a no-op per the ingest contract.
/// OR IGNORE rather than a targeted conflict clause: a replayed payload
/// regenerates the same deterministic id, so the primary key collides too.
pub fn insert_if_absent(conn: &Connection, event: &CanonicalEvent) -> Result<bool> {
    let inserted = conn.execute(
        r#"
        INSERT OR IGNORE INTO canonical_events
            (id, org_id, source, event_type, source_event_type, status, event_time, ingested_at,
             amount_cents, currency, external_subscription_id, product_id, plan_tier,
             billing_interval, trial_started_at, period_start, period_end, user_id,
             idempotency_key, raw_payload)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)
        "#,
        params![
            event.id.to_string(),
            event.org_id.to_string(),
            event.source.as_str(),
            event.event_type.as_str(),
            &event.source_event_type,
            event.status.as_str(),
            ts(event.event_time),
            ts(event.ingested_at),
            event.amount_cents,
            &event.currency,
            &event.external_subscription_id,
            &event.product_id,
            &event.plan_tier,
            &event.billing_interval,
            opt_ts(event.trial_started_at),
            opt_ts(event.period_start),
            opt_ts(event.period_end),
            event.user_id.map(|u| u.to_string()),
            &event.idempotency_key,
            event.raw_payload.to_string(),
        ],
    )?;
    Ok(inserted > 0)
}

#[allow(clippy::type_complexity)]
fn row_tuple(row: &Row<'_>) -> rusqlite::Result<
    (String, String, String, String, Option<String>, String, String, String,
     Option<i64>, Option<String>, Option<String>, Option<String>, Option<String>,
     Option<String>, Option<String>, Option<String>, Option<String>, Option<String>,
     String, String),
> {
    Ok((
        row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?,
        row.get(6)?, row.get(7)?, row.get(8)?, row.get(9)?, row.get(10)?, row.get(11)?,
        row.get(12)?, row.get(13)?, row.get(14)?, row.get(15)?, row.get(16)?, row.get(17)?,
        row.get(18)?, row.get(19)?,
    ))
}

#[allow(clippy::type_complexity)]
fn decode(
    raw: (String, String, String, String, Option<String>, String, String, String,
          Option<i64>, Option<String>, Option<String>, Option<String>, Option<String>,
          Option<String>, Option<String>, Option<String>, Option<String>, Option<String>,
          String, String),
) -> Result<CanonicalEvent> {
    let (id, org_id, source, event_type, source_event_type, status, event_time, ingested_at,
         amount_cents, currency, external_subscription_id, product_id, plan_tier,
         billing_interval, trial_started_at, period_start, period_end, user_id,
         idempotency_key, raw_payload) = raw;
    Ok(CanonicalEvent {
        id: parse_uuid(&id)?,
        org_id: parse_uuid(&org_id)?,
        source: source.parse()?,
        event_type: event_type.parse()?,
        source_event_type,
        status: status.parse::<EventStatus>()?,
        event_time: parse_ts(&event_time)?,
        ingested_at: parse_ts(&ingested_at)?,
        amount_cents,
        currency,
        external_subscription_id,
        product_id,
        plan_tier,
        billing_interval,
        trial_started_at: parse_opt_ts(trial_started_at)?,
        period_start: parse_opt_ts(period_start)?,
        period_end: parse_opt_ts(period_end)?,
        user_id: parse_opt_uuid(user_id)?,
        idempotency_key,
        raw_payload: serde_json::from_str(&raw_payload)?,
    })
}

pub fn get(conn: &Connection, id: Uuid) -> Result<Option<CanonicalEvent>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM canonical_events WHERE id = ?1", SELECT_COLS),
            [id.to_string()],
            row_tuple,
        )
        .optional()?;
    row.map(decode).transpose()
}

pub fn set_user(conn: &Connection, event_id: Uuid, user_id: Uuid) -> Result<()> {
    conn.execute(
        "UPDATE canonical_events SET user_id = ?2 WHERE id = ?1",
        params![event_id.to_string(), user_id.to_string()],
    )?;
    Ok(())
}

/// Merge support: move every event from one user to another
pub fn rewrite_user(conn: &Connection, org_id: Uuid, from: Uuid, to: Uuid) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE canonical_events SET user_id = ?3 WHERE org_id = ?1 AND user_id = ?2",
        params![org_id.to_string(), from.to_string(), to.to_string()],
    )?;
    Ok(changed)
}

pub fn list_for_user(
    conn: &Connection,
    org_id: Uuid,
    user_id: Uuid,
    limit: usize,
) -> Result<Vec<CanonicalEvent>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM canonical_events WHERE org_id = ?1 AND user_id = ?2 \
         ORDER BY event_time DESC LIMIT {}",
        SELECT_COLS, limit
    ))?;
    let rows = stmt.query_map(params![org_id.to_string(), user_id.to_string()], row_tuple)?;

    let mut events = Vec::new();
    for row in rows {
        events.push(decode(row?)?);
    }
    Ok(events)
}

/// Events for one `(user, source, product)` in event_time order; the replay
/// input for projection equivalence checks
pub fn list_for_projection(
    conn: &Connection,
    org_id: Uuid,
    user_id: Uuid,
    source: Source,
    product_id: &str,
) -> Result<Vec<CanonicalEvent>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM canonical_events \
         WHERE org_id = ?1 AND user_id = ?2 AND source = ?3 \
           AND (product_id = ?4 OR (product_id IS NULL AND external_subscription_id = ?4)) \
         ORDER BY event_time ASC, ingested_at ASC",
        SELECT_COLS
    ))?;
    let rows = stmt.query_map(
        params![
            org_id.to_string(),
            user_id.to_string(),
            source.as_str(),
            product_id
        ],
        row_tuple,
    )?;

    let mut events = Vec::new();
    for row in rows {
        events.push(decode(row?)?);
    }
    Ok(events)
}

pub fn list(
    conn: &Connection,
    org_id: Uuid,
    source: Option<Source>,
    event_type: Option<EventType>,
    limit: usize,
    offset: usize,
) -> Result<Vec<CanonicalEvent>> {
    let mut where_clauses = vec!["org_id = ?".to_string()];
    let mut bind: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(org_id.to_string())];

    if let Some(source) = source {
        where_clauses.push("source = ?".to_string());
        bind.push(Box::new(source.as_str().to_string()));
    }
    if let Some(event_type) = event_type {
        where_clauses.push("event_type = ?".to_string());
        bind.push(Box::new(event_type.as_str().to_string()));
    }

    let query = format!(
        "SELECT {} FROM canonical_events WHERE {} ORDER BY event_time DESC LIMIT {} OFFSET {}",
        SELECT_COLS,
        where_clauses.join(" AND "),
        limit,
        offset
    );

    let mut stmt = conn.prepare(&query)?;
    let rows = stmt.query_map(
        rusqlite::params_from_iter(bind.iter().map(|b| b.as_ref())),
        row_tuple,
    )?;

    let mut events = Vec::new();
    for row in rows {
        events.push(decode(row?)?);
    }
    Ok(events)
}

/// Count successful renewals in a window; the renewal-anomaly input
pub fn count_renewals_since(
    conn: &Connection,
    org_id: Uuid,
    source: Source,
    since: DateTime<Utc>,
) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM canonical_events \
         WHERE org_id = ?1 AND source = ?2 AND event_type = 'renewal' \
           AND status = 'success' AND event_time >= ?3",
        params![org_id.to_string(), source.as_str(), ts(since)],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn last_event_time(
    conn: &Connection,
    org_id: Uuid,
    source: Source,
) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT MAX(event_time) FROM canonical_events WHERE org_id = ?1 AND source = ?2",
            params![org_id.to_string(), source.as_str()],
            |row| row.get(0),
        )
        .optional()?
        .flatten();
    parse_opt_ts(raw)
}

/// Event times for one source since a cutoff, ascending; used to derive the
/// expected inter-arrival baseline for the delivery-gap detector
pub fn event_times_since(
    conn: &Connection,
    org_id: Uuid,
    source: Source,
    since: DateTime<Utc>,
) -> Result<Vec<DateTime<Utc>>> {
    let mut stmt = conn.prepare(
        "SELECT event_time FROM canonical_events \
         WHERE org_id = ?1 AND source = ?2 AND event_time >= ?3 ORDER BY event_time ASC",
    )?;
    let rows = stmt.query_map(
        params![org_id.to_string(), source.as_str(), ts(since)],
        |row| row.get::<_, String>(0),
    )?;

    let mut times = Vec::new();
    for row in rows {
        times.push(parse_ts(&row?)?);
    }
    Ok(times)
}

/// Most recent event touching a `(user, source, product)`; feeds the
/// data-freshness detector
pub fn last_event_time_for_projection(
    conn: &Connection,
    org_id: Uuid,
    user_id: Uuid,
    source: Source,
    product_id: &str,
) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT MAX(event_time) FROM canonical_events \
             WHERE org_id = ?1 AND user_id = ?2 AND source = ?3 \
               AND (product_id = ?4 OR (product_id IS NULL AND external_subscription_id = ?4))",
            params![
                org_id.to_string(),
                user_id.to_string(),
                source.as_str(),
                product_id
            ],
            |row| row.get(0),
        )
        .optional()?
        .flatten();
    parse_opt_ts(raw)
}

pub fn count(conn: &Connection, org_id: Uuid) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM canonical_events WHERE org_id = ?1",
        [org_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count)
}

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use revtrace_types::{ProcessingStatus, Source};

use crate::db::{opt_ts, parse_opt_ts, parse_ts, parse_uuid, ts};
use crate::records::RawWebhookRecord;
use crate::Result;

pub fn insert(conn: &Connection, record: &RawWebhookRecord) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO raw_webhook_log
            (id, org_id, source, received_at, headers, body, processing_status,
             external_event_id, event_type, http_status, error_message, processed_at, attempts)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        "#,
        params![
            record.id.to_string(),
            record.org_id.to_string(),
            record.source.as_str(),
            ts(record.received_at),
            record.headers.to_string(),
            &record.body,
            record.processing_status.as_str(),
            &record.external_event_id,
            &record.event_type,
            record.http_status,
            &record.error_message,
            opt_ts(record.processed_at),
            record.attempts,
        ],
    )?;
    Ok(())
}

pub fn set_status(conn: &Connection, id: Uuid, status: ProcessingStatus) -> Result<()> {
    conn.execute(
        "UPDATE raw_webhook_log SET processing_status = ?2 WHERE id = ?1",
        params![id.to_string(), status.as_str()],
    )?;
    Ok(())
}

/// Terminal success: record what the normalizer extracted
pub fn mark_processed(
    conn: &Connection,
    id: Uuid,
    external_event_id: Option<&str>,
    event_type: Option<&str>,
) -> Result<()> {
    conn.execute(
        r#"
        UPDATE raw_webhook_log
        SET processing_status = 'processed',
            external_event_id = ?2,
            event_type = ?3,
            processed_at = ?4,
            error_message = NULL
        WHERE id = ?1
        "#,
        params![id.to_string(), external_event_id, event_type, ts(Utc::now())],
    )?;
    Ok(())
}

/// Authentication failure: signature mismatch or replay. Not retried.
pub fn mark_skipped(conn: &Connection, id: Uuid, reason: &str) -> Result<()> {
    conn.execute(
        r#"
        UPDATE raw_webhook_log
        SET processing_status = 'skipped', error_message = ?2, processed_at = ?3
        WHERE id = ?1
        "#,
        params![id.to_string(), reason, ts(Utc::now())],
    )?;
    Ok(())
}

/// Terminal failure: parse error or retry budget exhausted
pub fn mark_failed(conn: &Connection, id: Uuid, error: &str) -> Result<()> {
    conn.execute(
        r#"
        UPDATE raw_webhook_log
        SET processing_status = 'failed', error_message = ?2, processed_at = ?3
        WHERE id = ?1
        "#,
        params![id.to_string(), error, ts(Utc::now())],
    )?;
    Ok(())
}

pub fn bump_attempts(conn: &Connection, id: Uuid) -> Result<i64> {
    conn.execute(
        "UPDATE raw_webhook_log SET attempts = attempts + 1 WHERE id = ?1",
        [id.to_string()],
    )?;
    let attempts: i64 = conn.query_row(
        "SELECT attempts FROM raw_webhook_log WHERE id = ?1",
        [id.to_string()],
        |row| row.get(0),
    )?;
    Ok(attempts)
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<
    (String, String, String, String, String, String, String,
     Option<String>, Option<String>, Option<i64>, Option<String>, Option<String>, i64),
> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
        row.get(12)?,
    ))
}

fn decode(
    raw: (String, String, String, String, String, String, String,
          Option<String>, Option<String>, Option<i64>, Option<String>, Option<String>, i64),
) -> Result<RawWebhookRecord> {
    let (id, org_id, source, received_at, headers, body, status,
         external_event_id, event_type, http_status, error_message, processed_at, attempts) = raw;
    Ok(RawWebhookRecord {
        id: parse_uuid(&id)?,
        org_id: parse_uuid(&org_id)?,
        source: source.parse()?,
        received_at: parse_ts(&received_at)?,
        headers: serde_json::from_str(&headers)?,
        body,
        processing_status: status.parse()?,
        external_event_id,
        event_type,
        http_status,
        error_message,
        processed_at: parse_opt_ts(processed_at)?,
        attempts,
    })
}

const SELECT_COLS: &str = "id, org_id, source, received_at, headers, body, processing_status, \
     external_event_id, event_type, http_status, error_message, processed_at, attempts";

pub fn get(conn: &Connection, id: Uuid) -> Result<Option<RawWebhookRecord>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM raw_webhook_log WHERE id = ?1", SELECT_COLS),
            [id.to_string()],
            record_from_row,
        )
        .optional()?;
    row.map(decode).transpose()
}

pub fn list(
    conn: &Connection,
    org_id: Uuid,
    source: Option<Source>,
    status: Option<ProcessingStatus>,
    limit: usize,
    offset: usize,
) -> Result<Vec<RawWebhookRecord>> {
    let mut where_clauses = vec!["org_id = ?".to_string()];
    let mut bind: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(org_id.to_string())];

    if let Some(source) = source {
        where_clauses.push("source = ?".to_string());
        bind.push(Box::new(source.as_str().to_string()));
    }
    if let Some(status) = status {
        where_clauses.push("processing_status = ?".to_string());
        bind.push(Box::new(status.as_str().to_string()));
    }

    let query = format!(
        "SELECT {} FROM raw_webhook_log WHERE {} ORDER BY received_at DESC LIMIT {} OFFSET {}",
        SELECT_COLS,
        where_clauses.join(" AND "),
        limit,
        offset
    );

    let mut stmt = conn.prepare(&query)?;
    let rows = stmt.query_map(
        rusqlite::params_from_iter(bind.iter().map(|b| b.as_ref())),
        record_from_row,
    )?;

    let mut records = Vec::new();
    for row in rows {
        records.push(decode(row?)?);
    }
    Ok(records)
}

pub fn last_received_at(
    conn: &Connection,
    org_id: Uuid,
    source: Source,
) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT MAX(received_at) FROM raw_webhook_log WHERE org_id = ?1 AND source = ?2",
            params![org_id.to_string(), source.as_str()],
            |row| row.get(0),
        )
        .optional()?
        .flatten();
    parse_opt_ts(raw)
}

pub fn count_since(
    conn: &Connection,
    org_id: Uuid,
    source: Source,
    since: DateTime<Utc>,
    status: Option<ProcessingStatus>,
) -> Result<i64> {
    let count = match status {
        Some(status) => conn.query_row(
            "SELECT COUNT(*) FROM raw_webhook_log \
             WHERE org_id = ?1 AND source = ?2 AND received_at >= ?3 AND processing_status = ?4",
            params![org_id.to_string(), source.as_str(), ts(since), status.as_str()],
            |row| row.get(0),
        )?,
        None => conn.query_row(
            "SELECT COUNT(*) FROM raw_webhook_log \
             WHERE org_id = ?1 AND source = ?2 AND received_at >= ?3",
            params![org_id.to_string(), source.as_str(), ts(since)],
            |row| row.get(0),
        )?,
    };
    Ok(count)
}

/// Retention knob: delete processed/skipped rows past the cutoff.
/// Failed rows are kept for manual inspection.
pub fn prune_older_than(conn: &Connection, cutoff: DateTime<Utc>) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM raw_webhook_log \
         WHERE received_at < ?1 AND processing_status IN ('processed', 'skipped')",
        [ts(cutoff)],
    )?;
    Ok(deleted)
}

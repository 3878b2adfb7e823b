use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::db::{parse_opt_ts, parse_ts, parse_uuid, ts};
use crate::records::DetectorRunRecord;
use crate::Result;

pub fn start(conn: &Connection, org_id: Uuid, detector_id: &str) -> Result<Uuid> {
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO detector_runs (id, org_id, detector_id, started_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            id.to_string(),
            org_id.to_string(),
            detector_id,
            ts(Utc::now())
        ],
    )?;
    Ok(id)
}

pub fn finish(
    conn: &Connection,
    run_id: Uuid,
    issues_created: i64,
    issues_updated: i64,
    error: Option<&str>,
) -> Result<()> {
    conn.execute(
        r#"
        UPDATE detector_runs
        SET completed_at = ?2, issues_created = ?3, issues_updated = ?4, error = ?5
        WHERE id = ?1
        "#,
        params![
            run_id.to_string(),
            ts(Utc::now()),
            issues_created,
            issues_updated,
            error
        ],
    )?;
    Ok(())
}

/// Cancelled scans terminate their ledger row without counters
pub fn mark_aborted(conn: &Connection, run_id: Uuid) -> Result<()> {
    conn.execute(
        "UPDATE detector_runs SET completed_at = ?2, error = 'aborted' WHERE id = ?1",
        params![run_id.to_string(), ts(Utc::now())],
    )?;
    Ok(())
}

/// When this detector last started for the org; the scheduler's rate limit
pub fn last_started_at(
    conn: &Connection,
    org_id: Uuid,
    detector_id: &str,
) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT MAX(started_at) FROM detector_runs WHERE org_id = ?1 AND detector_id = ?2",
            params![org_id.to_string(), detector_id],
            |row| row.get(0),
        )
        .optional()?
        .flatten();
    parse_opt_ts(raw)
}

pub fn get(conn: &Connection, run_id: Uuid) -> Result<Option<DetectorRunRecord>> {
    let row = conn
        .query_row(
            "SELECT id, org_id, detector_id, started_at, completed_at, issues_created, \
             issues_updated, error FROM detector_runs WHERE id = ?1",
            [run_id.to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, Option<String>>(7)?,
                ))
            },
        )
        .optional()?;

    row.map(
        |(id, org_id, detector_id, started_at, completed_at, created, updated, error)| {
            Ok(DetectorRunRecord {
                id: parse_uuid(&id)?,
                org_id: parse_uuid(&org_id)?,
                detector_id,
                started_at: parse_ts(&started_at)?,
                completed_at: parse_opt_ts(completed_at)?,
                issues_created: created,
                issues_updated: updated,
                error,
            })
        },
    )
    .transpose()
}

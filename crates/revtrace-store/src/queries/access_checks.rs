use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};
use uuid::Uuid;

use revtrace_types::AccessCheck;

use crate::db::{parse_opt_uuid, parse_ts, parse_uuid, ts};
use crate::Result;

const SELECT_COLS: &str =
    "id, org_id, user_id, external_user_ref, has_access, observed_at, source_tag";

fn row_tuple(
    row: &Row<'_>,
) -> rusqlite::Result<(String, String, Option<String>, String, bool, String, Option<String>)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn decode(
    raw: (String, String, Option<String>, String, bool, String, Option<String>),
) -> Result<AccessCheck> {
    let (id, org_id, user_id, external_user_ref, has_access, observed_at, source_tag) = raw;
    Ok(AccessCheck {
        id: parse_uuid(&id)?,
        org_id: parse_uuid(&org_id)?,
        user_id: parse_opt_uuid(user_id)?,
        external_user_ref,
        has_access,
        observed_at: parse_ts(&observed_at)?,
        source_tag,
    })
}

pub fn insert(conn: &Connection, check: &AccessCheck) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO access_checks
            (id, org_id, user_id, external_user_ref, has_access, observed_at, source_tag)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
        params![
            check.id.to_string(),
            check.org_id.to_string(),
            check.user_id.map(|u| u.to_string()),
            &check.external_user_ref,
            check.has_access,
            ts(check.observed_at),
            &check.source_tag,
        ],
    )?;
    Ok(())
}

/// Recent observations for one user, newest first; the Tier-2 evidence feed
pub fn recent_for_user(
    conn: &Connection,
    org_id: Uuid,
    user_id: Uuid,
    since: DateTime<Utc>,
) -> Result<Vec<AccessCheck>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM access_checks \
         WHERE org_id = ?1 AND user_id = ?2 AND observed_at >= ?3 \
         ORDER BY observed_at DESC",
        SELECT_COLS
    ))?;
    let rows = stmt.query_map(
        params![org_id.to_string(), user_id.to_string(), ts(since)],
        row_tuple,
    )?;

    let mut checks = Vec::new();
    for row in rows {
        checks.push(decode(row?)?);
    }
    Ok(checks)
}

/// Checks still waiting for an identity, scoped to one external ref
pub fn unresolved_for_ref(
    conn: &Connection,
    org_id: Uuid,
    external_user_ref: &str,
    retained_after: DateTime<Utc>,
) -> Result<Vec<AccessCheck>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM access_checks \
         WHERE org_id = ?1 AND user_id IS NULL AND external_user_ref = ?2 AND observed_at >= ?3",
        SELECT_COLS
    ))?;
    let rows = stmt.query_map(
        params![org_id.to_string(), external_user_ref, ts(retained_after)],
        row_tuple,
    )?;

    let mut checks = Vec::new();
    for row in rows {
        checks.push(decode(row?)?);
    }
    Ok(checks)
}

pub fn set_user(conn: &Connection, check_id: Uuid, user_id: Uuid) -> Result<()> {
    conn.execute(
        "UPDATE access_checks SET user_id = ?2 WHERE id = ?1",
        params![check_id.to_string(), user_id.to_string()],
    )?;
    Ok(())
}

/// TTL expiry for unresolved checks
pub fn prune_unresolved_before(conn: &Connection, cutoff: DateTime<Utc>) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM access_checks WHERE user_id IS NULL AND observed_at < ?1",
        [ts(cutoff)],
    )?;
    Ok(deleted)
}

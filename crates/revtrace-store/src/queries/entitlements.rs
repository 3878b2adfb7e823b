use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use revtrace_types::{Entitlement, EntitlementState, Source};

use crate::db::{opt_ts, parse_opt_ts, parse_ts, parse_uuid, ts};
use crate::Result;

const SELECT_COLS: &str = "id, org_id, user_id, source, product_id, state, will_cancel, \
     current_period_start, current_period_end, external_subscription_id, last_event_id, updated_at";

fn row_tuple(row: &Row<'_>) -> rusqlite::Result<
    (String, String, String, String, String, String, bool,
     Option<String>, Option<String>, Option<String>, String, String),
> {
    Ok((
        row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?,
        row.get(6)?, row.get(7)?, row.get(8)?, row.get(9)?, row.get(10)?, row.get(11)?,
    ))
}

fn decode(
    raw: (String, String, String, String, String, String, bool,
          Option<String>, Option<String>, Option<String>, String, String),
) -> Result<Entitlement> {
    let (id, org_id, user_id, source, product_id, state, will_cancel,
         period_start, period_end, external_subscription_id, last_event_id, updated_at) = raw;
    Ok(Entitlement {
        id: parse_uuid(&id)?,
        org_id: parse_uuid(&org_id)?,
        user_id: parse_uuid(&user_id)?,
        source: source.parse()?,
        product_id,
        state: state.parse()?,
        will_cancel,
        current_period_start: parse_opt_ts(period_start)?,
        current_period_end: parse_opt_ts(period_end)?,
        external_subscription_id,
        last_event_id: parse_uuid(&last_event_id)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

pub fn get(
    conn: &Connection,
    org_id: Uuid,
    user_id: Uuid,
    source: Source,
    product_id: &str,
) -> Result<Option<Entitlement>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {} FROM entitlements \
                 WHERE org_id = ?1 AND user_id = ?2 AND source = ?3 AND product_id = ?4",
                SELECT_COLS
            ),
            params![
                org_id.to_string(),
                user_id.to_string(),
                source.as_str(),
                product_id
            ],
            row_tuple,
        )
        .optional()?;
    row.map(decode).transpose()
}

pub fn upsert(conn: &Connection, entitlement: &Entitlement) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO entitlements
            (id, org_id, user_id, source, product_id, state, will_cancel,
             current_period_start, current_period_end, external_subscription_id,
             last_event_id, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        ON CONFLICT(org_id, user_id, source, product_id) DO UPDATE SET
            state = ?6,
            will_cancel = ?7,
            current_period_start = COALESCE(?8, current_period_start),
            current_period_end = COALESCE(?9, current_period_end),
            external_subscription_id = COALESCE(?10, external_subscription_id),
            last_event_id = ?11,
            updated_at = ?12
        "#,
        params![
            entitlement.id.to_string(),
            entitlement.org_id.to_string(),
            entitlement.user_id.to_string(),
            entitlement.source.as_str(),
            &entitlement.product_id,
            entitlement.state.as_str(),
            entitlement.will_cancel,
            opt_ts(entitlement.current_period_start),
            opt_ts(entitlement.current_period_end),
            &entitlement.external_subscription_id,
            entitlement.last_event_id.to_string(),
            ts(entitlement.updated_at),
        ],
    )?;
    Ok(())
}

/// Direct state write for the lazy grace-period sweep
pub fn set_state(conn: &Connection, id: Uuid, state: EntitlementState) -> Result<()> {
    conn.execute(
        "UPDATE entitlements SET state = ?2, updated_at = ?3 WHERE id = ?1",
        params![id.to_string(), state.as_str(), ts(Utc::now())],
    )?;
    Ok(())
}

pub fn list_for_user(conn: &Connection, org_id: Uuid, user_id: Uuid) -> Result<Vec<Entitlement>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM entitlements WHERE org_id = ?1 AND user_id = ?2 ORDER BY source, product_id",
        SELECT_COLS
    ))?;
    let rows = stmt.query_map(params![org_id.to_string(), user_id.to_string()], row_tuple)?;

    let mut entitlements = Vec::new();
    for row in rows {
        entitlements.push(decode(row?)?);
    }
    Ok(entitlements)
}

/// Every entitlement in an access-granting state for the org
pub fn list_access_granting(conn: &Connection, org_id: Uuid) -> Result<Vec<Entitlement>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM entitlements WHERE org_id = ?1 \
         AND state IN ('trial', 'active', 'grace_period', 'billing_retry') \
         ORDER BY user_id, source, product_id",
        SELECT_COLS
    ))?;
    let rows = stmt.query_map([org_id.to_string()], row_tuple)?;

    let mut entitlements = Vec::new();
    for row in rows {
        entitlements.push(decode(row?)?);
    }
    Ok(entitlements)
}

/// Active/trial entitlements whose paid period ended before the cutoff;
/// candidates for the lazy grace-period transition
pub fn list_period_lapsed(
    conn: &Connection,
    org_id: Uuid,
    cutoff: DateTime<Utc>,
) -> Result<Vec<Entitlement>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM entitlements WHERE org_id = ?1 \
         AND state IN ('trial', 'active') \
         AND current_period_end IS NOT NULL AND current_period_end < ?2",
        SELECT_COLS
    ))?;
    let rows = stmt.query_map(params![org_id.to_string(), ts(cutoff)], row_tuple)?;

    let mut entitlements = Vec::new();
    for row in rows {
        entitlements.push(decode(row?)?);
    }
    Ok(entitlements)
}

/// Move entitlements between users during a merge. When both sides hold a
/// row for the same `(source, product)`, the loser's row is dropped rather
/// than tripping the uniqueness constraint; the survivor's projection is the
/// one later events continued to fold into.
pub fn merge_user(conn: &Connection, org_id: Uuid, from: Uuid, to: Uuid) -> Result<usize> {
    conn.execute(
        r#"
        DELETE FROM entitlements
        WHERE org_id = ?1 AND user_id = ?2
          AND EXISTS (
              SELECT 1 FROM entitlements survivor
              WHERE survivor.org_id = ?1 AND survivor.user_id = ?3
                AND survivor.source = entitlements.source
                AND survivor.product_id = entitlements.product_id
          )
        "#,
        params![org_id.to_string(), from.to_string(), to.to_string()],
    )?;
    let changed = conn.execute(
        "UPDATE entitlements SET user_id = ?3 WHERE org_id = ?1 AND user_id = ?2",
        params![org_id.to_string(), from.to_string(), to.to_string()],
    )?;
    Ok(changed)
}

pub fn count_by_state(conn: &Connection, org_id: Uuid) -> Result<Vec<(EntitlementState, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT state, COUNT(*) FROM entitlements WHERE org_id = ?1 GROUP BY state",
    )?;
    let rows = stmt.query_map([org_id.to_string()], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;

    let mut counts = Vec::new();
    for row in rows {
        let (state, count) = row?;
        counts.push((state.parse()?, count));
    }
    Ok(counts)
}

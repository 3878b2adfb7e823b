use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use uuid::Uuid;

use crate::db::{parse_ts, parse_uuid, ts};
use crate::records::{AlertConfigRecord, AlertDeliveryRecord, DeliveryOutcome};
use crate::Result;

pub fn insert_config(conn: &Connection, config: &AlertConfigRecord) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO alert_configs (id, org_id, channel, max_per_window, window_secs, is_active)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            config.id.to_string(),
            config.org_id.to_string(),
            &config.channel,
            config.max_per_window,
            config.window_secs,
            config.is_active,
        ],
    )?;
    Ok(())
}

pub fn list_active_configs(conn: &Connection, org_id: Uuid) -> Result<Vec<AlertConfigRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, channel, max_per_window, window_secs FROM alert_configs \
         WHERE org_id = ?1 AND is_active = 1",
    )?;
    let rows = stmt.query_map([org_id.to_string()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, i64>(3)?,
        ))
    })?;

    let mut configs = Vec::new();
    for row in rows {
        let (id, channel, max_per_window, window_secs) = row?;
        configs.push(AlertConfigRecord {
            id: parse_uuid(&id)?,
            org_id,
            channel,
            max_per_window,
            window_secs,
            is_active: true,
        });
    }
    Ok(configs)
}

pub fn insert_delivery(conn: &Connection, delivery: &AlertDeliveryRecord) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO alert_deliveries (id, org_id, alert_config_id, issue_id, outcome, detail, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
        params![
            delivery.id.to_string(),
            delivery.org_id.to_string(),
            delivery.alert_config_id.to_string(),
            delivery.issue_id.to_string(),
            delivery.outcome.as_str(),
            &delivery.detail,
            ts(delivery.created_at),
        ],
    )?;
    Ok(())
}

pub fn count_deliveries_since(
    conn: &Connection,
    alert_config_id: Uuid,
    outcome: DeliveryOutcome,
    since: DateTime<Utc>,
) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM alert_deliveries \
         WHERE alert_config_id = ?1 AND outcome = ?2 AND created_at >= ?3",
        params![alert_config_id.to_string(), outcome.as_str(), ts(since)],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn list_deliveries(
    conn: &Connection,
    org_id: Uuid,
    limit: usize,
) -> Result<Vec<(Uuid, String, DateTime<Utc>)>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT issue_id, outcome, created_at FROM alert_deliveries \
         WHERE org_id = ?1 ORDER BY created_at DESC LIMIT {}",
        limit
    ))?;
    let rows = stmt.query_map([org_id.to_string()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut deliveries = Vec::new();
    for row in rows {
        let (issue_id, outcome, created_at) = row?;
        deliveries.push((parse_uuid(&issue_id)?, outcome, parse_ts(&created_at)?));
    }
    Ok(deliveries)
}

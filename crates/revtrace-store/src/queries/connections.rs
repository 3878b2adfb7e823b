use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use revtrace_types::Source;

use crate::db::{parse_ts, parse_uuid, ts};
use crate::records::ConnectionRecord;
use crate::Result;

pub fn upsert(
    conn: &Connection,
    org_id: Uuid,
    source: Source,
    webhook_secret_enc: &str,
) -> Result<ConnectionRecord> {
    let record = ConnectionRecord {
        id: Uuid::new_v4(),
        org_id,
        source,
        webhook_secret_enc: webhook_secret_enc.to_string(),
        is_active: true,
        created_at: Utc::now(),
    };

    conn.execute(
        r#"
        INSERT INTO billing_connections (id, org_id, source, webhook_secret_enc, is_active, created_at)
        VALUES (?1, ?2, ?3, ?4, 1, ?5)
        ON CONFLICT(org_id, source) DO UPDATE SET
            webhook_secret_enc = ?4,
            is_active = 1
        "#,
        params![
            record.id.to_string(),
            org_id.to_string(),
            source.as_str(),
            webhook_secret_enc,
            ts(record.created_at)
        ],
    )?;

    // The conflict branch keeps the original row id
    get(conn, org_id, source)?.ok_or_else(|| crate::Error::Query("connection upsert vanished".into()))
}

pub fn get(conn: &Connection, org_id: Uuid, source: Source) -> Result<Option<ConnectionRecord>> {
    let row = conn
        .query_row(
            r#"
            SELECT id, webhook_secret_enc, is_active, created_at
            FROM billing_connections
            WHERE org_id = ?1 AND source = ?2
            "#,
            params![org_id.to_string(), source.as_str()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()?;

    row.map(|(id, secret, is_active, created_at)| {
        Ok(ConnectionRecord {
            id: parse_uuid(&id)?,
            org_id,
            source,
            webhook_secret_enc: secret,
            is_active,
            created_at: parse_ts(&created_at)?,
        })
    })
    .transpose()
}

pub fn list_active(conn: &Connection, org_id: Uuid) -> Result<Vec<ConnectionRecord>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, source, webhook_secret_enc, is_active, created_at
        FROM billing_connections
        WHERE org_id = ?1 AND is_active = 1
        ORDER BY source
        "#,
    )?;

    let rows = stmt.query_map([org_id.to_string()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, bool>(3)?,
            row.get::<_, String>(4)?,
        ))
    })?;

    let mut records = Vec::new();
    for row in rows {
        let (id, source, secret, is_active, created_at) = row?;
        records.push(ConnectionRecord {
            id: parse_uuid(&id)?,
            org_id,
            source: source.parse()?,
            webhook_secret_enc: secret,
            is_active,
            created_at: parse_ts(&created_at)?,
        });
    }
    Ok(records)
}

pub fn set_active(conn: &Connection, org_id: Uuid, source: Source, is_active: bool) -> Result<()> {
    conn.execute(
        "UPDATE billing_connections SET is_active = ?3 WHERE org_id = ?1 AND source = ?2",
        params![org_id.to_string(), source.as_str(), is_active],
    )?;
    Ok(())
}

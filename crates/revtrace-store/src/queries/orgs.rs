use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::db::{parse_ts, parse_uuid, ts};
use crate::records::OrgRecord;
use crate::Result;

pub fn insert(conn: &Connection, org: &OrgRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO organizations (id, slug, name, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            org.id.to_string(),
            &org.slug,
            &org.name,
            ts(org.created_at)
        ],
    )?;
    Ok(())
}

pub fn create(conn: &Connection, slug: &str, name: &str) -> Result<OrgRecord> {
    let org = OrgRecord {
        id: Uuid::new_v4(),
        slug: slug.to_string(),
        name: name.to_string(),
        created_at: Utc::now(),
    };
    insert(conn, &org)?;
    Ok(org)
}

pub fn get_by_slug(conn: &Connection, slug: &str) -> Result<Option<OrgRecord>> {
    let row = conn
        .query_row(
            "SELECT id, slug, name, created_at FROM organizations WHERE slug = ?1",
            [slug],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()?;

    row.map(|(id, slug, name, created_at)| {
        Ok(OrgRecord {
            id: parse_uuid(&id)?,
            slug,
            name,
            created_at: parse_ts(&created_at)?,
        })
    })
    .transpose()
}

pub fn list_ids(conn: &Connection) -> Result<Vec<Uuid>> {
    let mut stmt = conn.prepare("SELECT id FROM organizations ORDER BY created_at")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

    let mut ids = Vec::new();
    for row in rows {
        ids.push(parse_uuid(&row?)?);
    }
    Ok(ids)
}

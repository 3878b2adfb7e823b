use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use revtrace_types::User;

use crate::db::{parse_opt_uuid, parse_ts, parse_uuid, ts};
use crate::Result;

pub fn insert(conn: &Connection, user: &User) -> Result<()> {
    conn.execute(
        "INSERT INTO users (id, org_id, email, external_user_id, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            user.id.to_string(),
            user.org_id.to_string(),
            &user.email,
            &user.external_user_id,
            ts(user.created_at)
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, org_id: Uuid, id: Uuid) -> Result<Option<User>> {
    let row = conn
        .query_row(
            "SELECT id, org_id, email, external_user_id, created_at FROM users \
             WHERE org_id = ?1 AND id = ?2",
            params![org_id.to_string(), id.to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )
        .optional()?;

    row.map(|(id, org_id, email, external_user_id, created_at)| {
        Ok(User {
            id: parse_uuid(&id)?,
            org_id: parse_uuid(&org_id)?,
            email,
            external_user_id,
            created_at: parse_ts(&created_at)?,
        })
    })
    .transpose()
}

pub fn get_many(conn: &Connection, org_id: Uuid, ids: &[Uuid]) -> Result<Vec<User>> {
    let mut users = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(user) = get(conn, org_id, *id)? {
            users.push(user);
        }
    }
    Ok(users)
}

/// Fill missing profile fields from newly seen hints; never overwrites
pub fn fill_profile(
    conn: &Connection,
    user_id: Uuid,
    email: Option<&str>,
    external_user_id: Option<&str>,
) -> Result<()> {
    conn.execute(
        r#"
        UPDATE users SET
            email = COALESCE(email, ?2),
            external_user_id = COALESCE(external_user_id, ?3)
        WHERE id = ?1
        "#,
        params![user_id.to_string(), email, external_user_id],
    )?;
    Ok(())
}

pub fn delete(conn: &Connection, org_id: Uuid, id: Uuid) -> Result<()> {
    conn.execute(
        "DELETE FROM users WHERE org_id = ?1 AND id = ?2",
        params![org_id.to_string(), id.to_string()],
    )?;
    Ok(())
}

pub fn count(conn: &Connection, org_id: Uuid) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE org_id = ?1",
        [org_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Any user row still referenced by an identity under another user id would
/// be a dangling merge leftover; used by merge-soundness assertions
pub fn dangling_references(conn: &Connection, org_id: Uuid) -> Result<i64> {
    let count = conn.query_row(
        r#"
        SELECT
            (SELECT COUNT(*) FROM user_identities i
             WHERE i.org_id = ?1 AND NOT EXISTS (SELECT 1 FROM users u WHERE u.id = i.user_id))
          + (SELECT COUNT(*) FROM entitlements e
             WHERE e.org_id = ?1 AND NOT EXISTS (SELECT 1 FROM users u WHERE u.id = e.user_id))
          + (SELECT COUNT(*) FROM canonical_events c
             WHERE c.org_id = ?1 AND c.user_id IS NOT NULL
               AND NOT EXISTS (SELECT 1 FROM users u WHERE u.id = c.user_id))
        "#,
        [org_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn user_id_of_event(conn: &Connection, event_id: Uuid) -> Result<Option<Uuid>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT user_id FROM canonical_events WHERE id = ?1",
            [event_id.to_string()],
            |row| row.get(0),
        )
        .optional()?
        .flatten();
    parse_opt_uuid(raw)
}

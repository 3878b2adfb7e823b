use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use revtrace_types::{IdType, IdentityHint, UserIdentity};

use crate::db::parse_uuid;
use crate::Result;

/// Look up the user owning a hint. Email hints match on the normalized key
/// across every source; all other id types match within their source.
pub fn lookup_user(conn: &Connection, org_id: Uuid, hint: &IdentityHint) -> Result<Option<Uuid>> {
    let key = hint.lookup_key();
    let raw: Option<String> = match hint.id_type {
        IdType::Email => conn
            .query_row(
                "SELECT user_id FROM user_identities \
                 WHERE org_id = ?1 AND id_type = 'email' AND external_key = ?2",
                params![org_id.to_string(), key],
                |row| row.get(0),
            )
            .optional()?,
        _ => conn
            .query_row(
                "SELECT user_id FROM user_identities \
                 WHERE org_id = ?1 AND source = ?2 AND external_key = ?3",
                params![org_id.to_string(), hint.source.as_str(), key],
                |row| row.get(0),
            )
            .optional()?,
    };
    raw.as_deref().map(parse_uuid).transpose()
}

/// Attach a hint to a user. `(org, source, external_key)` uniqueness makes
/// re-attachment of an already-known identifier a no-op.
pub fn attach(conn: &Connection, org_id: Uuid, user_id: Uuid, hint: &IdentityHint) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO user_identities (id, org_id, user_id, source, external_id, external_key, id_type)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(org_id, source, external_key) DO NOTHING
        "#,
        params![
            Uuid::new_v4().to_string(),
            org_id.to_string(),
            user_id.to_string(),
            hint.source.as_str(),
            &hint.external_id,
            hint.lookup_key(),
            hint.id_type.as_str(),
        ],
    )?;
    Ok(())
}

/// Resolve a bare external reference with no declared id type, the shape
/// access-check ingress receives. Tries the exact key first, then the
/// email-normalized form.
pub fn lookup_user_by_ref(conn: &Connection, org_id: Uuid, user_ref: &str) -> Result<Option<Uuid>> {
    let normalized = user_ref.trim().to_lowercase();
    let raw: Option<String> = conn
        .query_row(
            "SELECT user_id FROM user_identities \
             WHERE org_id = ?1 AND external_key IN (?2, ?3) LIMIT 1",
            params![org_id.to_string(), user_ref, normalized],
            |row| row.get(0),
        )
        .optional()?;
    raw.as_deref().map(parse_uuid).transpose()
}

pub fn rewrite_user(conn: &Connection, org_id: Uuid, from: Uuid, to: Uuid) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE user_identities SET user_id = ?3 WHERE org_id = ?1 AND user_id = ?2",
        params![org_id.to_string(), from.to_string(), to.to_string()],
    )?;
    Ok(changed)
}

pub fn list_for_user(conn: &Connection, org_id: Uuid, user_id: Uuid) -> Result<Vec<UserIdentity>> {
    let mut stmt = conn.prepare(
        "SELECT id, source, external_id, id_type FROM user_identities \
         WHERE org_id = ?1 AND user_id = ?2 ORDER BY source, id_type",
    )?;
    let rows = stmt.query_map(params![org_id.to_string(), user_id.to_string()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;

    let mut identities = Vec::new();
    for row in rows {
        let (id, source, external_id, id_type) = row?;
        identities.push(UserIdentity {
            id: parse_uuid(&id)?,
            org_id,
            user_id,
            source: source.parse()?,
            external_id,
            id_type: id_type.parse()?,
        });
    }
    Ok(identities)
}

/// Invariant check: exactly one row per `(org, source, external_key)`
pub fn duplicate_key_count(conn: &Connection, org_id: Uuid) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM (SELECT source, external_key FROM user_identities \
         WHERE org_id = ?1 GROUP BY source, external_key HAVING COUNT(*) > 1)",
        [org_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count)
}

use chrono::Utc;
use rusqlite::Connection;
use uuid::Uuid;

use revtrace_store::{Database, queries};
use revtrace_types::{IdType, IdentityHint, User};

use crate::Result;

/// Outcome of resolving one event's identity hints
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// No hints were provided; the event stays aggregate-only
    NoHints,
    /// Hints matched (or created) exactly this user
    Resolved(Uuid),
    /// Hints spanned several users which were merged into the survivor
    Merged { survivor: Uuid, absorbed: Vec<Uuid> },
}

impl Resolution {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Resolution::NoHints => None,
            Resolution::Resolved(id) => Some(*id),
            Resolution::Merged { survivor, .. } => Some(*survivor),
        }
    }
}

/// Attach an event to an internal user.
///
/// Conceptually the hints form an undirected identity graph whose connected
/// components are users; observing hints that span components unions them.
/// The component is persisted directly as the user id, so a union is a merge:
/// the oldest user survives and every reference is rewritten.
///
/// Runs in one transaction; a failed merge leaves nothing half-moved.
pub fn resolve_event_identity(
    db: &mut Database,
    org_id: Uuid,
    event_id: Uuid,
    hints: &[IdentityHint],
) -> Result<Resolution> {
    if hints.is_empty() {
        return Ok(Resolution::NoHints);
    }

    db.with_tx(|conn| {
        let mut matched: Vec<Uuid> = Vec::new();
        for hint in hints {
            if let Some(user_id) = queries::identities::lookup_user(conn, org_id, hint)?
                && !matched.contains(&user_id)
            {
                matched.push(user_id);
            }
        }

        let user_id = match matched.len() {
            0 => create_user(conn, org_id, hints)?,
            1 => matched[0],
            _ => return merge_users(conn, org_id, event_id, &matched, hints).map_err(Into::into),
        };

        attach_hints(conn, org_id, user_id, hints)?;
        queries::events::set_user(conn, event_id, user_id)?;
        Ok(Resolution::Resolved(user_id))
    })
    .map_err(Into::into)
}

fn create_user(
    conn: &Connection,
    org_id: Uuid,
    hints: &[IdentityHint],
) -> revtrace_store::Result<Uuid> {
    let user = User {
        id: Uuid::new_v4(),
        org_id,
        email: first_hint(hints, IdType::Email),
        external_user_id: first_hint(hints, IdType::AppUserId),
        created_at: Utc::now(),
    };
    queries::users::insert(conn, &user)?;
    Ok(user.id)
}

fn first_hint(hints: &[IdentityHint], id_type: IdType) -> Option<String> {
    hints
        .iter()
        .find(|h| h.id_type == id_type)
        .map(|h| h.external_id.clone())
}

fn attach_hints(
    conn: &Connection,
    org_id: Uuid,
    user_id: Uuid,
    hints: &[IdentityHint],
) -> revtrace_store::Result<()> {
    for hint in hints {
        queries::identities::attach(conn, org_id, user_id, hint)?;
    }
    queries::users::fill_profile(
        conn,
        user_id,
        first_hint(hints, IdType::Email).as_deref(),
        first_hint(hints, IdType::AppUserId).as_deref(),
    )
}

/// Collapse several users into the oldest one. Rewrites identities, events,
/// entitlements, and issues from the losers, then deletes them so nothing
/// dangles.
fn merge_users(
    conn: &Connection,
    org_id: Uuid,
    event_id: Uuid,
    candidates: &[Uuid],
    hints: &[IdentityHint],
) -> revtrace_store::Result<Resolution> {
    let mut users = queries::users::get_many(conn, org_id, candidates)?;
    users.sort_by_key(|u| u.created_at);

    let survivor = users[0].id;
    let mut absorbed = Vec::new();

    for loser in users.iter().skip(1) {
        queries::identities::rewrite_user(conn, org_id, loser.id, survivor)?;
        queries::events::rewrite_user(conn, org_id, loser.id, survivor)?;
        queries::entitlements::merge_user(conn, org_id, loser.id, survivor)?;
        queries::issues::rewrite_user(conn, org_id, loser.id, survivor)?;

        queries::users::fill_profile(
            conn,
            survivor,
            loser.email.as_deref(),
            loser.external_user_id.as_deref(),
        )?;
        queries::users::delete(conn, org_id, loser.id)?;
        absorbed.push(loser.id);
    }

    attach_hints(conn, org_id, survivor, hints)?;
    queries::events::set_user(conn, event_id, survivor)?;

    tracing::info!(
        org = %org_id,
        survivor = %survivor,
        absorbed = absorbed.len(),
        "merged duplicate users"
    );

    Ok(Resolution::Merged { survivor, absorbed })
}

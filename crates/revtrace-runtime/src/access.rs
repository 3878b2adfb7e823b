use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use revtrace_store::queries;
use revtrace_types::AccessCheck;

use crate::Result;

/// Maximum records per batch call
pub const MAX_BATCH: usize = 500;

#[derive(Debug, Clone, Copy)]
pub struct RecordedCheck {
    pub id: Uuid,
    pub user_resolved: bool,
}

/// Access-check ingress. Fire-and-forget on the client side, so the server
/// half is an append plus a best-effort identity lookup and nothing else.
pub struct AccessCheckService {
    ttl_hours: i64,
}

impl AccessCheckService {
    pub fn new(ttl_hours: i64) -> Self {
        Self { ttl_hours }
    }

    pub fn record(
        &self,
        conn: &Connection,
        org_id: Uuid,
        external_user_ref: &str,
        has_access: bool,
        observed_at: Option<DateTime<Utc>>,
        source_tag: Option<&str>,
    ) -> Result<RecordedCheck> {
        let user_id = queries::identities::lookup_user_by_ref(conn, org_id, external_user_ref)?;

        let check = AccessCheck {
            id: Uuid::new_v4(),
            org_id,
            user_id,
            external_user_ref: external_user_ref.to_string(),
            has_access,
            observed_at: observed_at.unwrap_or_else(Utc::now),
            source_tag: source_tag.map(str::to_string),
        };
        queries::access_checks::insert(conn, &check)?;

        Ok(RecordedCheck {
            id: check.id,
            user_resolved: user_id.is_some(),
        })
    }

    /// Batch ingest, atomic: either every record lands or none do.
    /// Caller wraps this in a transaction.
    pub fn record_batch(
        &self,
        conn: &Connection,
        org_id: Uuid,
        records: &[(String, bool, Option<DateTime<Utc>>)],
    ) -> Result<Vec<RecordedCheck>> {
        if records.len() > MAX_BATCH {
            return Err(crate::Error::InvalidOperation(format!(
                "batch of {} exceeds the {} record limit",
                records.len(),
                MAX_BATCH
            )));
        }
        let mut recorded = Vec::with_capacity(records.len());
        for (user_ref, has_access, observed_at) in records {
            recorded.push(self.record(conn, org_id, user_ref, *has_access, *observed_at, None)?);
        }
        Ok(recorded)
    }

    /// Attach retained unresolved checks once a matching identity appears.
    /// Called after identity resolution with the refs the new identities
    /// answer for.
    pub fn replay_unresolved(
        &self,
        conn: &Connection,
        org_id: Uuid,
        user_id: Uuid,
        refs: &[String],
    ) -> Result<usize> {
        let retained_after = Utc::now() - Duration::hours(self.ttl_hours);
        let mut replayed = 0;

        for user_ref in refs {
            let pending =
                queries::access_checks::unresolved_for_ref(conn, org_id, user_ref, retained_after)?;
            for check in pending {
                queries::access_checks::set_user(conn, check.id, user_id)?;
                replayed += 1;
            }
        }

        if replayed > 0 {
            tracing::debug!(org = %org_id, user = %user_id, replayed, "replayed access checks");
        }
        Ok(replayed)
    }

    /// TTL sweep for checks that never found their identity
    pub fn prune_expired(&self, conn: &Connection) -> Result<usize> {
        let cutoff = Utc::now() - Duration::hours(self.ttl_hours);
        Ok(queries::access_checks::prune_unresolved_before(conn, cutoff)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revtrace_store::{Database, OrgRecord};
    use revtrace_types::{IdType, IdentityHint, Source, User};

    fn seed_org(db: &Database) -> Uuid {
        let org = OrgRecord {
            id: Uuid::new_v4(),
            slug: "acme".to_string(),
            name: "Acme".to_string(),
            created_at: Utc::now(),
        };
        queries::orgs::insert(db.conn(), &org).unwrap();
        org.id
    }

    fn seed_identified_user(db: &Database, org_id: Uuid, external_id: &str) -> Uuid {
        let user = User {
            id: Uuid::new_v4(),
            org_id,
            email: None,
            external_user_id: None,
            created_at: Utc::now(),
        };
        queries::users::insert(db.conn(), &user).unwrap();
        queries::identities::attach(
            db.conn(),
            org_id,
            user.id,
            &IdentityHint::new(Source::Stripe, IdType::CustomerId, external_id),
        )
        .unwrap();
        user.id
    }

    #[test]
    fn known_ref_resolves_immediately() {
        let db = Database::open_in_memory().unwrap();
        let org = seed_org(&db);
        seed_identified_user(&db, org, "cus_A");

        let service = AccessCheckService::new(72);
        let recorded = service
            .record(db.conn(), org, "cus_A", true, None, Some("ios_sdk"))
            .unwrap();
        assert!(recorded.user_resolved);
    }

    #[test]
    fn unknown_ref_is_retained_and_replayed() {
        let db = Database::open_in_memory().unwrap();
        let org = seed_org(&db);

        let service = AccessCheckService::new(72);
        let recorded = service
            .record(db.conn(), org, "cus_LATER", false, None, None)
            .unwrap();
        assert!(!recorded.user_resolved);

        // Identity appears afterwards; the retained check is attached
        let user_id = seed_identified_user(&db, org, "cus_LATER");
        let replayed = service
            .replay_unresolved(db.conn(), org, user_id, &["cus_LATER".to_string()])
            .unwrap();
        assert_eq!(replayed, 1);

        let recent = queries::access_checks::recent_for_user(
            db.conn(),
            org,
            user_id,
            Utc::now() - Duration::hours(1),
        )
        .unwrap();
        assert_eq!(recent.len(), 1);
        assert!(!recent[0].has_access);
    }

    #[test]
    fn oversized_batch_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let org = seed_org(&db);
        let service = AccessCheckService::new(72);

        let records: Vec<(String, bool, Option<DateTime<Utc>>)> =
            (0..=MAX_BATCH).map(|i| (format!("u{}", i), true, None)).collect();
        assert!(service.record_batch(db.conn(), org, &records).is_err());
    }
}

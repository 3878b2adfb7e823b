use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use revtrace_engine::{ProjectionOutcome, project_event, replay_projection};
use revtrace_store::{Database, OrgRecord, queries};
use revtrace_types::{
    CanonicalEvent, EntitlementState, EventStatus, EventType, Source, User,
};

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

fn seed_user(db: &Database, org_id: Uuid) -> Uuid {
    let user = User {
        id: Uuid::new_v4(),
        org_id,
        email: None,
        external_user_id: None,
        created_at: Utc::now(),
    };
    queries::users::insert(db.conn(), &user).unwrap();
    user.id
}

fn event(
    org_id: Uuid,
    user_id: Uuid,
    event_type: EventType,
    key: &str,
    minutes_ago: i64,
) -> CanonicalEvent {
    let idempotency_key = format!("stripe:{}", key);
    CanonicalEvent {
        id: CanonicalEvent::id_for(org_id, &idempotency_key),
        org_id,
        source: Source::Stripe,
        event_type,
        source_event_type: None,
        status: match event_type {
            EventType::Refund => EventStatus::Refunded,
            EventType::BillingRetry => EventStatus::Failed,
            _ => EventStatus::Success,
        },
        event_time: Utc::now() - Duration::minutes(minutes_ago),
        ingested_at: Utc::now(),
        amount_cents: Some(999),
        currency: Some("USD".to_string()),
        external_subscription_id: Some("sub_1".to_string()),
        product_id: Some("prod_pro".to_string()),
        plan_tier: None,
        billing_interval: Some("month".to_string()),
        trial_started_at: None,
        period_start: None,
        period_end: Some(Utc::now() + Duration::days(30)),
        user_id: Some(user_id),
        idempotency_key,
        raw_payload: json!({}),
    }
}

fn store_and_project(db: &Database, ev: &CanonicalEvent) -> ProjectionOutcome {
    queries::events::insert_if_absent(db.conn(), ev).unwrap();
    project_event(db.conn(), ev).unwrap()
}

#[test]
fn purchase_creates_active_entitlement() {
    let db = Database::open_in_memory().unwrap();
    let org = seed_org(&db);
    let user = seed_user(&db, org);

    let outcome = store_and_project(&db, &event(org, user, EventType::Purchase, "e1", 60));
    match outcome {
        ProjectionOutcome::Applied(ent) => {
            assert_eq!(ent.state, EntitlementState::Active);
            assert!(!ent.will_cancel);
            assert!(ent.current_period_end.is_some());
        }
        other => panic!("expected Applied, got {:?}", other),
    }
}

#[test]
fn trial_purchase_creates_trial_entitlement() {
    let db = Database::open_in_memory().unwrap();
    let org = seed_org(&db);
    let user = seed_user(&db, org);

    let mut ev = event(org, user, EventType::Purchase, "e1", 60);
    ev.trial_started_at = Some(Utc::now() - Duration::minutes(60));
    let outcome = store_and_project(&db, &ev);
    match outcome {
        ProjectionOutcome::Applied(ent) => assert_eq!(ent.state, EntitlementState::Trial),
        other => panic!("expected Applied, got {:?}", other),
    }
}

#[test]
fn refund_transitions_active_to_refunded() {
    let db = Database::open_in_memory().unwrap();
    let org = seed_org(&db);
    let user = seed_user(&db, org);

    store_and_project(&db, &event(org, user, EventType::Purchase, "e1", 120));
    let outcome = store_and_project(&db, &event(org, user, EventType::Refund, "e2", 60));
    match outcome {
        ProjectionOutcome::Applied(ent) => assert_eq!(ent.state, EntitlementState::Refunded),
        other => panic!("expected Applied, got {:?}", other),
    }
}

#[test]
fn cancellation_holds_state_and_flags_will_cancel() {
    let db = Database::open_in_memory().unwrap();
    let org = seed_org(&db);
    let user = seed_user(&db, org);

    store_and_project(&db, &event(org, user, EventType::Purchase, "e1", 120));
    let outcome = store_and_project(&db, &event(org, user, EventType::Cancellation, "e2", 60));
    match outcome {
        ProjectionOutcome::Applied(ent) => {
            assert_eq!(ent.state, EntitlementState::Active);
            assert!(ent.will_cancel);
        }
        other => panic!("expected Applied, got {:?}", other),
    }

    // A renewal clears the flag
    let outcome = store_and_project(&db, &event(org, user, EventType::Renewal, "e3", 30));
    match outcome {
        ProjectionOutcome::Applied(ent) => {
            assert_eq!(ent.state, EntitlementState::Active);
            assert!(!ent.will_cancel);
        }
        other => panic!("expected Applied, got {:?}", other),
    }
}

#[test]
fn refund_without_prior_entitlement_is_a_conflict() {
    let db = Database::open_in_memory().unwrap();
    let org = seed_org(&db);
    let user = seed_user(&db, org);

    let outcome = store_and_project(&db, &event(org, user, EventType::Refund, "e1", 60));
    match outcome {
        ProjectionOutcome::Conflict { current, event_type } => {
            assert_eq!(current, None);
            assert_eq!(event_type, EventType::Refund);
        }
        other => panic!("expected Conflict, got {:?}", other),
    }

    // Entitlement row must not have appeared
    let ent = queries::entitlements::get(db.conn(), org, user, Source::Stripe, "prod_pro").unwrap();
    assert!(ent.is_none());
}

#[test]
fn event_without_user_does_not_project() {
    let db = Database::open_in_memory().unwrap();
    let org = seed_org(&db);
    let user = seed_user(&db, org);

    let mut ev = event(org, user, EventType::Purchase, "e1", 60);
    ev.user_id = None;
    queries::events::insert_if_absent(db.conn(), &ev).unwrap();
    assert_eq!(project_event(db.conn(), &ev).unwrap(), ProjectionOutcome::NoUser);
}

#[test]
fn pause_and_resume_cycle() {
    let db = Database::open_in_memory().unwrap();
    let org = seed_org(&db);
    let user = seed_user(&db, org);

    store_and_project(&db, &event(org, user, EventType::Purchase, "e1", 240));
    match store_and_project(&db, &event(org, user, EventType::Pause, "e2", 180)) {
        ProjectionOutcome::Applied(ent) => assert_eq!(ent.state, EntitlementState::Paused),
        other => panic!("expected Applied, got {:?}", other),
    }
    match store_and_project(&db, &event(org, user, EventType::Resume, "e3", 120)) {
        ProjectionOutcome::Applied(ent) => assert_eq!(ent.state, EntitlementState::Active),
        other => panic!("expected Applied, got {:?}", other),
    }
}

#[test]
fn replay_matches_incremental_projection() {
    // Monotonic projection: replaying the stream in event_time order must
    // reproduce what incremental projection built
    let db = Database::open_in_memory().unwrap();
    let org = seed_org(&db);
    let user = seed_user(&db, org);

    let sequence = [
        (EventType::Purchase, "e1", 600),
        (EventType::Renewal, "e2", 500),
        (EventType::BillingRetry, "e3", 400),
        (EventType::Renewal, "e4", 300),
        (EventType::Cancellation, "e5", 200),
        (EventType::Expiration, "e6", 100),
        (EventType::Purchase, "e7", 50),
    ];

    let mut last_incremental = None;
    for (event_type, key, minutes_ago) in sequence {
        if let ProjectionOutcome::Applied(ent) =
            store_and_project(&db, &event(org, user, event_type, key, minutes_ago))
        {
            last_incremental = Some((ent.state, ent.will_cancel));
        }
    }

    let replayed = replay_projection(db.conn(), org, user, Source::Stripe, "prod_pro").unwrap();
    assert_eq!(replayed, last_incremental);
    assert_eq!(replayed, Some((EntitlementState::Active, false)));
}

#[test]
fn conflicting_events_leave_replay_and_incremental_agreed() {
    let db = Database::open_in_memory().unwrap();
    let org = seed_org(&db);
    let user = seed_user(&db, org);

    // The second refund is a conflict (already refunded); both paths must
    // skip it identically
    let sequence = [
        (EventType::Purchase, "e1", 400),
        (EventType::Refund, "e2", 300),
        (EventType::Refund, "e3", 200),
        (EventType::Purchase, "e4", 100),
    ];

    let mut last_incremental = None;
    for (event_type, key, minutes_ago) in sequence {
        if let ProjectionOutcome::Applied(ent) =
            store_and_project(&db, &event(org, user, event_type, key, minutes_ago))
        {
            last_incremental = Some((ent.state, ent.will_cancel));
        }
    }

    let replayed = replay_projection(db.conn(), org, user, Source::Stripe, "prod_pro").unwrap();
    assert_eq!(replayed, last_incremental);
    assert_eq!(replayed, Some((EntitlementState::Active, false)));
}

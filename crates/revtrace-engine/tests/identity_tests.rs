use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use revtrace_engine::{Resolution, resolve_event_identity};
use revtrace_store::{Database, OrgRecord, queries};
use revtrace_types::{
    CanonicalEvent, EventStatus, EventType, IdType, IdentityHint, Source,
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

fn seed_event(db: &Database, org_id: Uuid, source: Source, key: &str) -> CanonicalEvent {
    let idempotency_key = format!("{}:{}", source.as_str(), key);
    let ev = CanonicalEvent {
        id: CanonicalEvent::id_for(org_id, &idempotency_key),
        org_id,
        source,
        event_type: EventType::Purchase,
        source_event_type: None,
        status: EventStatus::Success,
        event_time: Utc::now() - Duration::minutes(5),
        ingested_at: Utc::now(),
        amount_cents: Some(999),
        currency: Some("USD".to_string()),
        external_subscription_id: Some(format!("sub_{}", key)),
        product_id: Some("prod_pro".to_string()),
        plan_tier: None,
        billing_interval: None,
        trial_started_at: None,
        period_start: None,
        period_end: None,
        user_id: None,
        idempotency_key,
        raw_payload: json!({}),
    };
    queries::events::insert_if_absent(db.conn(), &ev).unwrap();
    ev
}

#[test]
fn no_hints_leaves_event_unattributed() {
    let mut db = Database::open_in_memory().unwrap();
    let org = seed_org(&db);
    let ev = seed_event(&db, org, Source::Stripe, "e1");

    let resolution = resolve_event_identity(&mut db, org, ev.id, &[]).unwrap();
    assert_eq!(resolution, Resolution::NoHints);
    assert!(queries::users::user_id_of_event(db.conn(), ev.id).unwrap().is_none());
}

#[test]
fn first_hint_creates_user_and_attaches_event() {
    let mut db = Database::open_in_memory().unwrap();
    let org = seed_org(&db);
    let ev = seed_event(&db, org, Source::Stripe, "e1");

    let hints = vec![IdentityHint::new(Source::Stripe, IdType::CustomerId, "cus_A")];
    let resolution = resolve_event_identity(&mut db, org, ev.id, &hints).unwrap();

    let user_id = resolution.user_id().unwrap();
    assert_eq!(
        queries::users::user_id_of_event(db.conn(), ev.id).unwrap(),
        Some(user_id)
    );
    assert_eq!(queries::users::count(db.conn(), org).unwrap(), 1);
}

#[test]
fn same_identifier_reuses_the_user() {
    let mut db = Database::open_in_memory().unwrap();
    let org = seed_org(&db);
    let hints = vec![IdentityHint::new(Source::Stripe, IdType::CustomerId, "cus_A")];

    let ev1 = seed_event(&db, org, Source::Stripe, "e1");
    let first = resolve_event_identity(&mut db, org, ev1.id, &hints).unwrap();

    let ev2 = seed_event(&db, org, Source::Stripe, "e2");
    let second = resolve_event_identity(&mut db, org, ev2.id, &hints).unwrap();

    assert_eq!(first.user_id(), second.user_id());
    assert_eq!(queries::users::count(db.conn(), org).unwrap(), 1);
}

#[test]
fn email_hints_match_case_insensitively_but_store_the_original() {
    let mut db = Database::open_in_memory().unwrap();
    let org = seed_org(&db);

    let ev1 = seed_event(&db, org, Source::Stripe, "e1");
    let first = resolve_event_identity(
        &mut db,
        org,
        ev1.id,
        &[IdentityHint::new(Source::Stripe, IdType::Email, "User@Example.com")],
    )
    .unwrap();

    let ev2 = seed_event(&db, org, Source::Stripe, "e2");
    let second = resolve_event_identity(
        &mut db,
        org,
        ev2.id,
        &[IdentityHint::new(Source::Stripe, IdType::Email, "  user@example.COM ")],
    )
    .unwrap();

    assert_eq!(first.user_id(), second.user_id());

    let identities =
        queries::identities::list_for_user(db.conn(), org, first.user_id().unwrap()).unwrap();
    assert_eq!(identities.len(), 1);
    assert_eq!(identities[0].external_id, "User@Example.com");

    let user = queries::users::get(db.conn(), org, first.user_id().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(user.email.as_deref(), Some("User@Example.com"));
}

#[test]
fn merge_chain_converges_on_oldest_user() {
    // cus_A creates U1; an email attaches to U1; the same email observed
    // under another source's user U2 merges U2 into U1
    let mut db = Database::open_in_memory().unwrap();
    let org = seed_org(&db);

    // Event 1: stripe customer -> U1
    let ev1 = seed_event(&db, org, Source::Stripe, "e1");
    let r1 = resolve_event_identity(
        &mut db,
        org,
        ev1.id,
        &[IdentityHint::new(Source::Stripe, IdType::CustomerId, "cus_A")],
    )
    .unwrap();
    let u1 = r1.user_id().unwrap();

    std::thread::sleep(std::time::Duration::from_millis(5));

    // Event 2: same customer plus email -> attaches email to U1
    let ev2 = seed_event(&db, org, Source::Stripe, "e2");
    let r2 = resolve_event_identity(
        &mut db,
        org,
        ev2.id,
        &[
            IdentityHint::new(Source::Stripe, IdType::CustomerId, "cus_A"),
            IdentityHint::new(Source::Stripe, IdType::Email, "x@y"),
        ],
    )
    .unwrap();
    assert_eq!(r2.user_id(), Some(u1));

    std::thread::sleep(std::time::Duration::from_millis(5));

    // Event 3: recurly account code -> creates U2
    let ev3 = seed_event(&db, org, Source::Recurly, "e3");
    let r3 = resolve_event_identity(
        &mut db,
        org,
        ev3.id,
        &[IdentityHint::new(Source::Recurly, IdType::AccountCode, "acct_9")],
    )
    .unwrap();
    let u2 = r3.user_id().unwrap();
    assert_ne!(u1, u2);
    assert_eq!(queries::users::count(db.conn(), org).unwrap(), 2);

    // Event 4: recurly account code + the email known under U1 -> merge
    let ev4 = seed_event(&db, org, Source::Recurly, "e4");
    let r4 = resolve_event_identity(
        &mut db,
        org,
        ev4.id,
        &[
            IdentityHint::new(Source::Recurly, IdType::AccountCode, "acct_9"),
            IdentityHint::new(Source::Recurly, IdType::Email, "x@y"),
        ],
    )
    .unwrap();

    match r4 {
        Resolution::Merged { survivor, absorbed } => {
            assert_eq!(survivor, u1, "older user survives");
            assert_eq!(absorbed, vec![u2]);
        }
        other => panic!("expected merge, got {:?}", other),
    }

    // All of U2's references moved; U2 is gone; nothing dangles
    assert_eq!(queries::users::count(db.conn(), org).unwrap(), 1);
    assert_eq!(queries::users::user_id_of_event(db.conn(), ev3.id).unwrap(), Some(u1));
    assert_eq!(queries::users::user_id_of_event(db.conn(), ev4.id).unwrap(), Some(u1));
    assert_eq!(queries::users::dangling_references(db.conn(), org).unwrap(), 0);

    // Identity uniqueness held through the merge
    assert_eq!(queries::identities::duplicate_key_count(db.conn(), org).unwrap(), 0);

    // The account code now resolves straight to U1
    let lookup = queries::identities::lookup_user(
        db.conn(),
        org,
        &IdentityHint::new(Source::Recurly, IdType::AccountCode, "acct_9"),
    )
    .unwrap();
    assert_eq!(lookup, Some(u1));
}

#[test]
fn merge_unions_entitlements_without_duplicating_conflicts() {
    use revtrace_types::{Entitlement, EntitlementState};

    let mut db = Database::open_in_memory().unwrap();
    let org = seed_org(&db);

    let ev1 = seed_event(&db, org, Source::Stripe, "e1");
    let u1 = resolve_event_identity(
        &mut db,
        org,
        ev1.id,
        &[IdentityHint::new(Source::Stripe, IdType::CustomerId, "cus_A")],
    )
    .unwrap()
    .user_id()
    .unwrap();

    std::thread::sleep(std::time::Duration::from_millis(5));

    let ev2 = seed_event(&db, org, Source::AppleAppStore, "e2");
    let u2 = resolve_event_identity(
        &mut db,
        org,
        ev2.id,
        &[IdentityHint::new(Source::AppleAppStore, IdType::AppUserId, "tok_1")],
    )
    .unwrap()
    .user_id()
    .unwrap();

    // Both users hold a stripe prod_pro entitlement; u2 also holds an apple one
    for (user, source, product) in [
        (u1, Source::Stripe, "prod_pro"),
        (u2, Source::Stripe, "prod_pro"),
        (u2, Source::AppleAppStore, "com.example.pro"),
    ] {
        let ent = Entitlement {
            id: Uuid::new_v4(),
            org_id: org,
            user_id: user,
            source,
            product_id: product.to_string(),
            state: EntitlementState::Active,
            will_cancel: false,
            current_period_start: None,
            current_period_end: None,
            external_subscription_id: None,
            last_event_id: ev1.id,
            updated_at: Utc::now(),
        };
        queries::entitlements::upsert(db.conn(), &ent).unwrap();
    }

    // A delivery carrying both identifiers forces the merge
    let ev3 = seed_event(&db, org, Source::Stripe, "e3");
    let resolution = resolve_event_identity(
        &mut db,
        org,
        ev3.id,
        &[
            IdentityHint::new(Source::Stripe, IdType::CustomerId, "cus_A"),
            IdentityHint::new(Source::AppleAppStore, IdType::AppUserId, "tok_1"),
        ],
    )
    .unwrap();
    assert_eq!(resolution.user_id(), Some(u1));

    let entitlements = queries::entitlements::list_for_user(db.conn(), org, u1).unwrap();
    // The colliding stripe row collapsed; the apple row moved over
    assert_eq!(entitlements.len(), 2);
    assert_eq!(queries::users::dangling_references(db.conn(), org).unwrap(), 0);
}

use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use revtrace_engine::{
    Detector, DetectionEngine, DetectorConfig, all_detectors, project_event,
};
use revtrace_store::{Database, OrgRecord, queries};
use revtrace_types::{
    CanonicalEvent, DetectionTier, DetectorCategory, DetectorScope, Entitlement, EntitlementState,
    EventStatus, EventType, IssueSeverity, IssueStatus, Source, User,
};

fn seed_org(db: &Database, slug: &str) -> Uuid {
    let org = OrgRecord {
        id: Uuid::new_v4(),
        slug: slug.to_string(),
        name: slug.to_string(),
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

fn seed_connection(db: &Database, org_id: Uuid, source: Source) {
    queries::connections::upsert(db.conn(), org_id, source, "enc:unused").unwrap();
}

fn seed_entitlement(
    db: &Database,
    org_id: Uuid,
    user_id: Uuid,
    source: Source,
    product: &str,
    state: EntitlementState,
) -> Entitlement {
    let ent = Entitlement {
        id: Uuid::new_v4(),
        org_id,
        user_id,
        source,
        product_id: product.to_string(),
        state,
        will_cancel: false,
        current_period_start: None,
        current_period_end: Some(Utc::now() + Duration::days(20)),
        external_subscription_id: Some("sub_1".to_string()),
        last_event_id: Uuid::new_v4(),
        updated_at: Utc::now(),
    };
    queries::entitlements::upsert(db.conn(), &ent).unwrap();
    ent
}

fn renewal_event(org_id: Uuid, source: Source, key: &str, event_time: chrono::DateTime<Utc>) -> CanonicalEvent {
    let idempotency_key = format!("{}:{}", source.as_str(), key);
    CanonicalEvent {
        id: CanonicalEvent::id_for(org_id, &idempotency_key),
        org_id,
        source,
        event_type: EventType::Renewal,
        source_event_type: None,
        status: EventStatus::Success,
        event_time,
        ingested_at: Utc::now(),
        amount_cents: Some(999),
        currency: Some("USD".to_string()),
        external_subscription_id: None,
        product_id: None,
        plan_tier: None,
        billing_interval: None,
        trial_started_at: None,
        period_start: None,
        period_end: None,
        user_id: None,
        idempotency_key,
        raw_payload: json!({}),
    }
}

fn refund_event(org_id: Uuid, user_id: Uuid, product: &str, key: &str) -> CanonicalEvent {
    let idempotency_key = format!("stripe:{}", key);
    CanonicalEvent {
        id: CanonicalEvent::id_for(org_id, &idempotency_key),
        org_id,
        source: Source::Stripe,
        event_type: EventType::Refund,
        source_event_type: Some("charge.refunded".to_string()),
        status: EventStatus::Refunded,
        event_time: Utc::now(),
        ingested_at: Utc::now(),
        amount_cents: Some(999),
        currency: Some("USD".to_string()),
        external_subscription_id: Some("sub_1".to_string()),
        product_id: Some(product.to_string()),
        plan_tier: None,
        billing_interval: None,
        trial_started_at: None,
        period_start: None,
        period_end: None,
        user_id: Some(user_id),
        idempotency_key,
        raw_payload: json!({}),
    }
}

fn detector_by_id(id: &str) -> Box<dyn Detector> {
    all_detectors()
        .into_iter()
        .find(|d| d.id() == id)
        .unwrap_or_else(|| panic!("unknown detector {}", id))
}

// --- unrevoked refund ---

#[test]
fn projected_refund_raises_no_issue() {
    let db = Database::open_in_memory().unwrap();
    let org = seed_org(&db, "acme");
    let user = seed_user(&db, org);
    seed_entitlement(&db, org, user, Source::Stripe, "prod_p", EntitlementState::Active);

    let engine = DetectionEngine::default();
    let refund = refund_event(org, user, "prod_p", "evt_r1");
    queries::events::insert_if_absent(db.conn(), &refund).unwrap();

    // Healthy path: projection runs first, entitlement flips to refunded
    project_event(db.conn(), &refund).unwrap();
    let ent = queries::entitlements::get(db.conn(), org, user, Source::Stripe, "prod_p")
        .unwrap()
        .unwrap();
    assert_eq!(ent.state, EntitlementState::Refunded);

    let transitions = engine.run_event_detectors(db.conn(), &refund);
    assert!(transitions.is_empty());
    assert_eq!(queries::issues::count_open(db.conn(), org).unwrap(), 0);
}

#[test]
fn refund_with_still_active_entitlement_raises_critical_issue() {
    let db = Database::open_in_memory().unwrap();
    let org = seed_org(&db, "acme");
    let user = seed_user(&db, org);
    // Simulated projection bug: entitlement stays active after the refund
    seed_entitlement(&db, org, user, Source::Stripe, "prod_p", EntitlementState::Active);

    let engine = DetectionEngine::default();
    let refund = refund_event(org, user, "prod_p", "evt_r1");
    queries::events::insert_if_absent(db.conn(), &refund).unwrap();

    let transitions = engine.run_event_detectors(db.conn(), &refund);
    assert_eq!(transitions.len(), 1);
    let issue = &transitions[0].issue;
    assert_eq!(issue.issue_type, "unrevoked_refund");
    assert_eq!(issue.severity, IssueSeverity::Critical);
    assert_eq!(issue.dedup_key, format!("unrevoked_refund:{}:prod_p", user));
    assert_eq!(issue.estimated_revenue_cents, Some(999));
    assert!(transitions[0].previous_status.is_none());
}

// --- duplicate billing ---

#[test]
fn duplicate_billing_across_sources_dedups_on_rescan() {
    let mut db = Database::open_in_memory().unwrap();
    let org = seed_org(&db, "acme");
    let user = seed_user(&db, org);

    seed_entitlement(&db, org, user, Source::Stripe, "prod_pro", EntitlementState::Active);
    seed_entitlement(
        &db,
        org,
        user,
        Source::AppleAppStore,
        "com.example.pro.monthly",
        EntitlementState::Active,
    );

    let mut config = DetectorConfig::default();
    config
        .product_aliases
        .insert("prod_pro".to_string(), "pro_monthly".to_string());
    let engine = DetectionEngine::new(config);

    let detector = detector_by_id("duplicate_billing");
    let outcome = engine.run_scheduled_scan(&mut db, org, detector.as_ref()).unwrap();
    assert_eq!(outcome.issues_created, 1);
    assert_eq!(outcome.error, None);

    let issue = &outcome.transitions[0].issue;
    assert_eq!(issue.issue_type, "duplicate_billing");
    assert_eq!(issue.severity, IssueSeverity::Critical);
    assert_eq!(issue.dedup_key, format!("duplicate_billing:{}:pro_monthly", user));

    // Second scan refreshes the same open issue instead of duplicating it
    let again = engine.run_scheduled_scan(&mut db, org, detector.as_ref()).unwrap();
    assert_eq!(again.issues_created, 0);
    assert_eq!(again.issues_updated, 1);
    assert_eq!(queries::issues::count_open(db.conn(), org).unwrap(), 1);
}

#[test]
fn single_entitlement_is_not_duplicate_billing() {
    let mut db = Database::open_in_memory().unwrap();
    let org = seed_org(&db, "acme");
    let user = seed_user(&db, org);
    seed_entitlement(&db, org, user, Source::Stripe, "prod_pro", EntitlementState::Active);

    let engine = DetectionEngine::default();
    let detector = detector_by_id("duplicate_billing");
    let outcome = engine.run_scheduled_scan(&mut db, org, detector.as_ref()).unwrap();
    assert_eq!(outcome.issues_created, 0);
}

// --- webhook delivery gap ---

fn seed_regular_stripe_traffic(db: &Database, org: Uuid, last_event_ago: Duration) {
    // 10-minute cadence for the baseline window, ending `last_event_ago` ago
    let end = Utc::now() - last_event_ago;
    for i in 0..144 {
        let ev = renewal_event(org, Source::Stripe, &format!("gap{}", i), end - Duration::minutes(10 * i));
        queries::events::insert_if_absent(db.conn(), &ev).unwrap();
    }
}

#[test]
fn two_hour_gap_on_ten_minute_baseline_is_a_warning() {
    let mut db = Database::open_in_memory().unwrap();
    let org = seed_org(&db, "acme");
    seed_connection(&db, org, Source::Stripe);
    seed_regular_stripe_traffic(&db, org, Duration::hours(2));

    let engine = DetectionEngine::default();
    let detector = detector_by_id("webhook_delivery_gap");
    let outcome = engine.run_scheduled_scan(&mut db, org, detector.as_ref()).unwrap();
    assert_eq!(outcome.issues_created, 1);

    let issue = &outcome.transitions[0].issue;
    assert_eq!(issue.issue_type, "webhook_delivery_gap");
    assert_eq!(issue.severity, IssueSeverity::Warning);
    assert_eq!(issue.dedup_key, "webhook_delivery_gap:stripe");
    assert_eq!(issue.evidence["baselineSecs"], json!(600));
}

#[test]
fn six_hour_gap_on_ten_minute_baseline_is_critical() {
    let mut db = Database::open_in_memory().unwrap();
    let org = seed_org(&db, "acme");
    seed_connection(&db, org, Source::Stripe);
    seed_regular_stripe_traffic(&db, org, Duration::hours(6));

    let engine = DetectionEngine::default();
    let detector = detector_by_id("webhook_delivery_gap");
    let outcome = engine.run_scheduled_scan(&mut db, org, detector.as_ref()).unwrap();
    assert_eq!(outcome.issues_created, 1);
    assert_eq!(outcome.transitions[0].issue.severity, IssueSeverity::Critical);
}

#[test]
fn healthy_cadence_raises_nothing() {
    let mut db = Database::open_in_memory().unwrap();
    let org = seed_org(&db, "acme");
    seed_connection(&db, org, Source::Stripe);
    seed_regular_stripe_traffic(&db, org, Duration::minutes(5));

    let engine = DetectionEngine::default();
    let detector = detector_by_id("webhook_delivery_gap");
    let outcome = engine.run_scheduled_scan(&mut db, org, detector.as_ref()).unwrap();
    assert_eq!(outcome.issues_created, 0);
}

// --- renewal anomaly thresholds ---

fn seed_renewals(db: &Database, org: Uuid, recent_6h: usize, total_30d: usize) {
    // `recent_6h` renewals inside the window, the rest spread over the month
    for i in 0..recent_6h {
        let ev = renewal_event(org, Source::Stripe, &format!("recent{}", i), Utc::now() - Duration::minutes(i as i64 + 1));
        queries::events::insert_if_absent(db.conn(), &ev).unwrap();
    }
    let older = total_30d - recent_6h;
    for i in 0..older {
        // Evenly inside (6h, 30d)
        let offset = Duration::hours(7) + Duration::minutes(i as i64 * 17 % (29 * 24 * 60));
        let ev = renewal_event(org, Source::Stripe, &format!("old{}", i), Utc::now() - offset);
        queries::events::insert_if_absent(db.conn(), &ev).unwrap();
    }
}

fn run_renewal_scan(recent_6h: usize) -> Option<(IssueSeverity, serde_json::Value)> {
    let mut db = Database::open_in_memory().unwrap();
    let org = seed_org(&db, "acme");
    seed_connection(&db, org, Source::Stripe);
    seed_renewals(&db, org, recent_6h, 2400);

    let engine = DetectionEngine::default();
    let detector = detector_by_id("renewal_anomaly");
    let outcome = engine.run_scheduled_scan(&mut db, org, detector.as_ref()).unwrap();
    outcome
        .transitions
        .first()
        .map(|t| (t.issue.severity, t.issue.evidence.clone()))
}

#[test]
fn renewal_silence_with_high_baseline_is_critical() {
    // mu = 2400/120 = 20; R6 = 0
    let (severity, evidence) = run_renewal_scan(0).expect("expected an issue");
    assert_eq!(severity, IssueSeverity::Critical);
    assert_eq!(evidence["recentCount"], json!(0));
    assert_eq!(evidence["expectedCount"].as_f64().unwrap(), 20.0);
    assert_eq!(evidence["dropPercent"].as_f64().unwrap(), 100.0);
    assert_eq!(evidence["windowHours"], json!(6));
    assert_eq!(evidence["baselineDays"], json!(30));
}

#[test]
fn seventy_percent_drop_is_critical() {
    // R6 = 6 -> drop = 70%
    let (severity, evidence) = run_renewal_scan(6).expect("expected an issue");
    assert_eq!(severity, IssueSeverity::Critical);
    assert!((evidence["dropPercent"].as_f64().unwrap() - 70.0).abs() < 0.01);
}

#[test]
fn thirty_percent_drop_is_a_warning() {
    // R6 = 14 -> drop = 30%
    let (severity, _) = run_renewal_scan(14).expect("expected an issue");
    assert_eq!(severity, IssueSeverity::Warning);
}

#[test]
fn ten_percent_drop_is_quiet() {
    // R6 = 18 -> drop = 10%
    assert!(run_renewal_scan(18).is_none());
}

// --- failure containment & ledger ---

struct ExplodingDetector;

impl Detector for ExplodingDetector {
    fn id(&self) -> &'static str {
        "exploding"
    }
    fn category(&self) -> DetectorCategory {
        DetectorCategory::IntegrationHealth
    }
    fn scope(&self) -> DetectorScope {
        DetectorScope::Aggregate
    }
    fn tier(&self) -> DetectionTier {
        DetectionTier::Tier1
    }
    fn default_severity(&self) -> IssueSeverity {
        IssueSeverity::Warning
    }
    fn scheduled_scan(
        &self,
        _ctx: &revtrace_engine::DetectorContext,
        _org: Uuid,
    ) -> revtrace_engine::Result<Vec<revtrace_types::DetectedIssue>> {
        Err(revtrace_engine::Error::Detector {
            detector_id: "exploding".to_string(),
            message: "synthetic failure".to_string(),
        })
    }
}

#[test]
fn detector_failure_lands_on_the_run_ledger_not_the_caller() {
    let mut db = Database::open_in_memory().unwrap();
    let org = seed_org(&db, "acme");

    let engine = DetectionEngine::default();
    let outcome = engine.run_scheduled_scan(&mut db, org, &ExplodingDetector).unwrap();
    assert!(outcome.error.as_deref().unwrap().contains("synthetic failure"));
    assert_eq!(outcome.issues_created, 0);

    let run = queries::detector_runs::get(db.conn(), outcome.run_id).unwrap().unwrap();
    assert!(run.completed_at.is_some());
    assert!(run.error.as_deref().unwrap().contains("synthetic failure"));
}

// --- issue lifecycle ---

#[test]
fn closed_issue_reopens_as_a_new_row() {
    let db = Database::open_in_memory().unwrap();
    let org = seed_org(&db, "acme");
    let user = seed_user(&db, org);
    seed_entitlement(&db, org, user, Source::Stripe, "prod_p", EntitlementState::Active);

    let engine = DetectionEngine::default();
    let refund = refund_event(org, user, "prod_p", "evt_r1");
    queries::events::insert_if_absent(db.conn(), &refund).unwrap();

    let transitions = engine.run_event_detectors(db.conn(), &refund);
    let first_id = transitions[0].issue.id;

    revtrace_engine::transition_issue(db.conn(), org, first_id, IssueStatus::Resolved, Some("manual"))
        .unwrap();

    // Situation persists: next detection creates a successor row
    let transitions = engine.run_event_detectors(db.conn(), &refund);
    assert_eq!(transitions.len(), 1);
    assert_ne!(transitions[0].issue.id, first_id);
    assert_eq!(queries::issues::count_open(db.conn(), org).unwrap(), 1);
}

#[test]
fn closed_issues_are_immutable() {
    let db = Database::open_in_memory().unwrap();
    let org = seed_org(&db, "acme");
    let user = seed_user(&db, org);
    seed_entitlement(&db, org, user, Source::Stripe, "prod_p", EntitlementState::Active);

    let engine = DetectionEngine::default();
    let refund = refund_event(org, user, "prod_p", "evt_r1");
    queries::events::insert_if_absent(db.conn(), &refund).unwrap();
    let transitions = engine.run_event_detectors(db.conn(), &refund);
    let issue_id = transitions[0].issue.id;

    revtrace_engine::transition_issue(db.conn(), org, issue_id, IssueStatus::Dismissed, None).unwrap();
    let err = revtrace_engine::transition_issue(db.conn(), org, issue_id, IssueStatus::Resolved, None);
    assert!(err.is_err());
}

// --- paid-no-access (tier 2) ---

#[test]
fn contradicting_access_checks_raise_tier2_issue_with_confidence() {
    use revtrace_types::AccessCheck;

    let mut db = Database::open_in_memory().unwrap();
    let org = seed_org(&db, "acme");
    let user = seed_user(&db, org);
    seed_entitlement(&db, org, user, Source::Stripe, "prod_pro", EntitlementState::Active);

    for i in 0..3 {
        let check = AccessCheck {
            id: Uuid::new_v4(),
            org_id: org,
            user_id: Some(user),
            external_user_ref: "cus_A".to_string(),
            has_access: false,
            observed_at: Utc::now() - Duration::minutes(10 + i),
            source_tag: Some("ios_sdk".to_string()),
        };
        queries::access_checks::insert(db.conn(), &check).unwrap();
    }

    let engine = DetectionEngine::default();
    let detector = detector_by_id("paid_no_access");
    let outcome = engine.run_scheduled_scan(&mut db, org, detector.as_ref()).unwrap();
    assert_eq!(outcome.issues_created, 1);

    let issue = &outcome.transitions[0].issue;
    assert_eq!(issue.detection_tier, DetectionTier::AppVerified);
    // Unanimous and fresh: full confidence, upgraded severity
    assert_eq!(issue.confidence, Some(1.0));
    assert_eq!(issue.severity, IssueSeverity::Critical);
}

#[test]
fn stale_tier2_issues_auto_resolve() {
    use revtrace_types::AccessCheck;

    let mut db = Database::open_in_memory().unwrap();
    let org = seed_org(&db, "acme");
    let user = seed_user(&db, org);
    seed_entitlement(&db, org, user, Source::Stripe, "prod_pro", EntitlementState::Active);

    let check = AccessCheck {
        id: Uuid::new_v4(),
        org_id: org,
        user_id: Some(user),
        external_user_ref: "cus_A".to_string(),
        has_access: false,
        observed_at: Utc::now() - Duration::minutes(10),
        source_tag: None,
    };
    queries::access_checks::insert(db.conn(), &check).unwrap();

    let mut config = DetectorConfig::default();
    config.tier2_auto_resolve_hours = 0;
    let engine = DetectionEngine::new(config);

    let detector = detector_by_id("paid_no_access");
    engine.run_scheduled_scan(&mut db, org, detector.as_ref()).unwrap();
    assert_eq!(queries::issues::count_open(db.conn(), org).unwrap(), 1);

    let resolved = engine.auto_resolve_stale_tier2(db.conn(), org).unwrap();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].issue.status, IssueStatus::Resolved);
    assert_eq!(resolved[0].issue.resolution.as_deref(), Some("auto_resolved_stale_evidence"));
    assert_eq!(queries::issues::count_open(db.conn(), org).unwrap(), 0);
}

// --- grace-period sweep ---

fn seed_lapsed_entitlement(
    db: &Database,
    org_id: Uuid,
    user_id: Uuid,
    source: Source,
    period_ended_hours_ago: i64,
) -> Uuid {
    let ent = Entitlement {
        id: Uuid::new_v4(),
        org_id,
        user_id,
        source,
        product_id: "prod_pro".to_string(),
        state: EntitlementState::Active,
        will_cancel: false,
        current_period_start: None,
        current_period_end: Some(Utc::now() - Duration::hours(period_ended_hours_ago)),
        external_subscription_id: Some("sub_1".to_string()),
        last_event_id: Uuid::new_v4(),
        updated_at: Utc::now(),
    };
    queries::entitlements::upsert(db.conn(), &ent).unwrap();
    ent.id
}

#[test]
fn shorter_per_source_grace_override_fires() {
    let db = Database::open_in_memory().unwrap();
    let org = seed_org(&db, "acme");
    let user = seed_user(&db, org);
    // Lapsed 3 hours ago: inside the 16-hour default, past the 1-hour override
    seed_lapsed_entitlement(&db, org, user, Source::Stripe, 3);

    let mut config = DetectorConfig::default();
    config.grace_window_overrides.insert("stripe".to_string(), 1);
    let engine = DetectionEngine::new(config);

    let moved = engine.apply_grace_transitions(db.conn(), org).unwrap();
    assert_eq!(moved, 1);

    let ent = queries::entitlements::get(db.conn(), org, user, Source::Stripe, "prod_pro")
        .unwrap()
        .unwrap();
    assert_eq!(ent.state, EntitlementState::GracePeriod);
}

#[test]
fn default_grace_window_holds_without_override() {
    let db = Database::open_in_memory().unwrap();
    let org = seed_org(&db, "acme");
    let user = seed_user(&db, org);
    seed_lapsed_entitlement(&db, org, user, Source::Stripe, 3);

    let engine = DetectionEngine::default();
    let moved = engine.apply_grace_transitions(db.conn(), org).unwrap();
    assert_eq!(moved, 0);

    let ent = queries::entitlements::get(db.conn(), org, user, Source::Stripe, "prod_pro")
        .unwrap()
        .unwrap();
    assert_eq!(ent.state, EntitlementState::Active);
}

#[test]
fn longer_per_source_grace_override_defers() {
    let db = Database::open_in_memory().unwrap();
    let org = seed_org(&db, "acme");
    let user = seed_user(&db, org);
    // Lapsed 20 hours ago: past the 16-hour default, inside the 48-hour override
    seed_lapsed_entitlement(&db, org, user, Source::Stripe, 20);

    let mut config = DetectorConfig::default();
    config.grace_window_overrides.insert("stripe".to_string(), 48);
    let engine = DetectionEngine::new(config);

    let moved = engine.apply_grace_transitions(db.conn(), org).unwrap();
    assert_eq!(moved, 0);

    let ent = queries::entitlements::get(db.conn(), org, user, Source::Stripe, "prod_pro")
        .unwrap()
        .unwrap();
    assert_eq!(ent.state, EntitlementState::Active);
}

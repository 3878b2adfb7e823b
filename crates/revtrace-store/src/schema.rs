use rusqlite::Connection;

use crate::{Error, Result};

// NOTE: Migration Design Rationale
//
// Why append-only numbered migrations (not drop-and-recreate)?
// - canonical_events is the source of truth for billing history; it cannot
//   be rebuilt from anything upstream once raw-log retention has pruned
// - PRAGMA user_version tracks how many entries of MIGRATIONS have run
// - A database whose version exceeds the binary's migration count was
//   written by a newer binary: that is drift, and startup must abort
//   (exit code 2 at the server boundary) rather than guess
//
// Why TEXT timestamps (RFC 3339) and TEXT uuids?
// - Keeps rows greppable in sqlite3 during incident debugging
// - Ordering on RFC 3339 strings matches chronological ordering

/// Append-only migration list; index + 1 is the schema version
pub const MIGRATIONS: &[&str] = &[
    // v1: full initial schema
    r#"
    CREATE TABLE organizations (
        id TEXT PRIMARY KEY,
        slug TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE billing_connections (
        id TEXT PRIMARY KEY,
        org_id TEXT NOT NULL,
        source TEXT NOT NULL,
        webhook_secret_enc TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        UNIQUE (org_id, source),
        FOREIGN KEY (org_id) REFERENCES organizations(id)
    );

    CREATE TABLE raw_webhook_log (
        id TEXT PRIMARY KEY,
        org_id TEXT NOT NULL,
        source TEXT NOT NULL,
        received_at TEXT NOT NULL,
        headers TEXT NOT NULL,
        body TEXT NOT NULL,
        processing_status TEXT NOT NULL,
        external_event_id TEXT,
        event_type TEXT,
        http_status INTEGER,
        error_message TEXT,
        processed_at TEXT,
        attempts INTEGER NOT NULL DEFAULT 0,
        FOREIGN KEY (org_id) REFERENCES organizations(id)
    );
    CREATE INDEX idx_raw_log_org_source ON raw_webhook_log(org_id, source, received_at DESC);
    CREATE INDEX idx_raw_log_status ON raw_webhook_log(org_id, processing_status);

    CREATE TABLE canonical_events (
        id TEXT PRIMARY KEY,
        org_id TEXT NOT NULL,
        source TEXT NOT NULL,
        event_type TEXT NOT NULL,
        source_event_type TEXT,
        status TEXT NOT NULL,
        event_time TEXT NOT NULL,
        ingested_at TEXT NOT NULL,
        amount_cents INTEGER,
        currency TEXT,
        external_subscription_id TEXT,
        product_id TEXT,
        plan_tier TEXT,
        billing_interval TEXT,
        trial_started_at TEXT,
        period_start TEXT,
        period_end TEXT,
        user_id TEXT,
        idempotency_key TEXT NOT NULL,
        raw_payload TEXT NOT NULL,
        UNIQUE (org_id, idempotency_key),
        FOREIGN KEY (org_id) REFERENCES organizations(id)
    );
    CREATE INDEX idx_events_org_time ON canonical_events(org_id, event_time DESC);
    CREATE INDEX idx_events_org_source_type ON canonical_events(org_id, source, event_type, event_time);
    CREATE INDEX idx_events_user ON canonical_events(org_id, user_id);
    CREATE INDEX idx_events_subscription ON canonical_events(org_id, source, external_subscription_id);

    CREATE TABLE users (
        id TEXT PRIMARY KEY,
        org_id TEXT NOT NULL,
        email TEXT,
        external_user_id TEXT,
        created_at TEXT NOT NULL,
        FOREIGN KEY (org_id) REFERENCES organizations(id)
    );

    CREATE TABLE user_identities (
        id TEXT PRIMARY KEY,
        org_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        source TEXT NOT NULL,
        external_id TEXT NOT NULL,
        external_key TEXT NOT NULL,
        id_type TEXT NOT NULL,
        UNIQUE (org_id, source, external_key),
        FOREIGN KEY (user_id) REFERENCES users(id)
    );
    CREATE INDEX idx_identities_user ON user_identities(user_id);
    CREATE INDEX idx_identities_email ON user_identities(org_id, id_type, external_key);

    CREATE TABLE entitlements (
        id TEXT PRIMARY KEY,
        org_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        source TEXT NOT NULL,
        product_id TEXT NOT NULL,
        state TEXT NOT NULL,
        will_cancel INTEGER NOT NULL DEFAULT 0,
        current_period_start TEXT,
        current_period_end TEXT,
        external_subscription_id TEXT,
        last_event_id TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (org_id, user_id, source, product_id),
        FOREIGN KEY (user_id) REFERENCES users(id)
    );
    CREATE INDEX idx_entitlements_org_state ON entitlements(org_id, state);
    CREATE INDEX idx_entitlements_user ON entitlements(org_id, user_id);

    CREATE TABLE issues (
        id TEXT PRIMARY KEY,
        org_id TEXT NOT NULL,
        detector_id TEXT NOT NULL,
        issue_type TEXT NOT NULL,
        severity TEXT NOT NULL,
        status TEXT NOT NULL,
        user_id TEXT,
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        estimated_revenue_cents INTEGER,
        confidence REAL,
        evidence TEXT NOT NULL,
        detection_tier TEXT NOT NULL,
        dedup_key TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        resolved_at TEXT,
        resolution TEXT,
        FOREIGN KEY (org_id) REFERENCES organizations(id)
    );
    CREATE UNIQUE INDEX idx_issues_open_dedup ON issues(org_id, dedup_key) WHERE status = 'open';
    CREATE INDEX idx_issues_org_status ON issues(org_id, status, severity);
    CREATE INDEX idx_issues_user ON issues(org_id, user_id);

    CREATE TABLE detector_runs (
        id TEXT PRIMARY KEY,
        org_id TEXT NOT NULL,
        detector_id TEXT NOT NULL,
        started_at TEXT NOT NULL,
        completed_at TEXT,
        issues_created INTEGER NOT NULL DEFAULT 0,
        issues_updated INTEGER NOT NULL DEFAULT 0,
        error TEXT,
        FOREIGN KEY (org_id) REFERENCES organizations(id)
    );
    CREATE INDEX idx_detector_runs_lookup ON detector_runs(org_id, detector_id, started_at DESC);

    CREATE TABLE access_checks (
        id TEXT PRIMARY KEY,
        org_id TEXT NOT NULL,
        user_id TEXT,
        external_user_ref TEXT NOT NULL,
        has_access INTEGER NOT NULL,
        observed_at TEXT NOT NULL,
        source_tag TEXT,
        FOREIGN KEY (org_id) REFERENCES organizations(id)
    );
    CREATE INDEX idx_access_checks_user ON access_checks(org_id, user_id, observed_at DESC);
    CREATE INDEX idx_access_checks_unresolved ON access_checks(org_id, external_user_ref) WHERE user_id IS NULL;

    CREATE TABLE alert_configs (
        id TEXT PRIMARY KEY,
        org_id TEXT NOT NULL,
        channel TEXT NOT NULL,
        max_per_window INTEGER NOT NULL DEFAULT 5,
        window_secs INTEGER NOT NULL DEFAULT 300,
        is_active INTEGER NOT NULL DEFAULT 1,
        FOREIGN KEY (org_id) REFERENCES organizations(id)
    );

    CREATE TABLE alert_deliveries (
        id TEXT PRIMARY KEY,
        org_id TEXT NOT NULL,
        alert_config_id TEXT NOT NULL,
        issue_id TEXT NOT NULL,
        outcome TEXT NOT NULL,
        detail TEXT,
        created_at TEXT NOT NULL,
        FOREIGN KEY (alert_config_id) REFERENCES alert_configs(id)
    );
    CREATE INDEX idx_alert_deliveries_config ON alert_deliveries(alert_config_id, created_at DESC);
    "#,
];

pub fn schema_version() -> i32 {
    MIGRATIONS.len() as i32
}

/// Apply pending migrations. Errors with `MigrationDrift` when the database
/// was written by a newer binary.
pub fn migrate(conn: &Connection) -> Result<()> {
    let current: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    let expected = schema_version();

    if current > expected {
        return Err(Error::MigrationDrift {
            found: current,
            expected,
        });
    }

    for (idx, sql) in MIGRATIONS.iter().enumerate() {
        let version = idx as i32 + 1;
        if version <= current {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
    }

    Ok(())
}

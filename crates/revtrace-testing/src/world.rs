//! TestWorld: a wired-up pipeline over a temp database for integration
//! tests. Seeds one org with active connections for every source and drives
//! deliveries through the same path the ingest workers use.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tempfile::TempDir;
use uuid::Uuid;

use revtrace_engine::{DetectionEngine, DetectorConfig};
use revtrace_providers::Registry;
use revtrace_runtime::{
    AccessCheckService, AlertDispatcher, DeliveryOutcome, PipelineDeps, SecretCodec,
    TracingAlertSink, process_delivery,
};
use revtrace_store::{Database, OrgRecord, RawWebhookRecord, queries};
use revtrace_types::{ProcessingStatus, Source};

use crate::fixtures;

const TEST_KEY_HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

pub struct TestWorldBuilder {
    detector_config: DetectorConfig,
}

impl TestWorldBuilder {
    pub fn new() -> Self {
        Self {
            detector_config: DetectorConfig::default(),
        }
    }

    pub fn with_product_alias(mut self, product_id: &str, family: &str) -> Self {
        self.detector_config
            .product_aliases
            .insert(product_id.to_string(), family.to_string());
        self
    }

    pub fn with_detector_config(mut self, config: DetectorConfig) -> Self {
        self.detector_config = config;
        self
    }

    pub fn build(self) -> TestWorld {
        let temp = TempDir::new().expect("create temp dir");
        let db_path = temp.path().join("revtrace.db");
        let db = Database::open(&db_path).expect("open database");

        let org = OrgRecord {
            id: Uuid::new_v4(),
            slug: "acme".to_string(),
            name: "Acme Co".to_string(),
            created_at: Utc::now(),
        };
        queries::orgs::insert(db.conn(), &org).expect("seed org");

        let secrets = SecretCodec::from_hex(TEST_KEY_HEX).expect("test key");
        for (source, secret) in [
            (Source::Stripe, fixtures::STRIPE_SECRET),
            (Source::Recurly, fixtures::RECURLY_SECRET),
            (Source::GooglePlay, fixtures::GOOGLE_PUSH_TOKEN),
            (Source::AppleAppStore, fixtures::APPLE_SECRET),
        ] {
            let sealed = secrets.encrypt(secret).expect("seal secret");
            queries::connections::upsert(db.conn(), org.id, source, &sealed).expect("seed connection");
        }

        let deps = Arc::new(PipelineDeps {
            registry: Arc::new(Registry::with_all()),
            engine: Arc::new(DetectionEngine::new(self.detector_config)),
            secrets: secrets.clone(),
            alerts: Arc::new(AlertDispatcher::new(Box::new(TracingAlertSink))),
            access: AccessCheckService::new(72),
        });

        TestWorld {
            _temp: temp,
            db_path,
            db,
            org_id: org.id,
            secrets,
            deps,
        }
    }
}

impl Default for TestWorldBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TestWorld {
    _temp: TempDir,
    pub db_path: PathBuf,
    pub db: Database,
    pub org_id: Uuid,
    pub secrets: SecretCodec,
    pub deps: Arc<PipelineDeps>,
}

impl TestWorld {
    pub fn new() -> Self {
        TestWorldBuilder::new().build()
    }

    pub fn builder() -> TestWorldBuilder {
        TestWorldBuilder::new()
    }

    /// Store a raw delivery exactly as the receiver would, then run the
    /// worker pass over it. Returns the pipeline's classification.
    pub fn deliver(
        &mut self,
        source: Source,
        headers: HashMap<String, String>,
        body: impl Into<String>,
    ) -> DeliveryOutcome {
        let raw_id = self.store_raw(source, headers, body);
        process_delivery(&mut self.db, &self.deps, raw_id).expect("pipeline pass")
    }

    /// Just the receiver half: persist the raw row, return its id
    pub fn store_raw(
        &mut self,
        source: Source,
        headers: HashMap<String, String>,
        body: impl Into<String>,
    ) -> Uuid {
        let raw = RawWebhookRecord {
            id: Uuid::new_v4(),
            org_id: self.org_id,
            source,
            received_at: Utc::now(),
            headers: json!(headers),
            body: body.into(),
            processing_status: ProcessingStatus::Received,
            external_event_id: None,
            event_type: None,
            http_status: None,
            error_message: None,
            processed_at: None,
            attempts: 0,
        };
        queries::raw_log::insert(self.db.conn(), &raw).expect("store raw delivery");
        raw.id
    }

    pub fn raw_status(&self, raw_id: Uuid) -> ProcessingStatus {
        queries::raw_log::get(self.db.conn(), raw_id)
            .expect("load raw row")
            .expect("raw row exists")
            .processing_status
    }

    pub fn event_count(&self) -> i64 {
        queries::events::count(self.db.conn(), self.org_id).expect("count events")
    }

    pub fn open_issue_count(&self) -> i64 {
        queries::issues::count_open(self.db.conn(), self.org_id).expect("count issues")
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

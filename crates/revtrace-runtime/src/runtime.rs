use std::sync::{Arc, Mutex};

use revtrace_engine::DetectionEngine;
use revtrace_providers::Registry;
use revtrace_store::Database;

use crate::access::AccessCheckService;
use crate::alerts::{AlertDispatcher, AlertSink, TracingAlertSink};
use crate::config::Config;
use crate::pipeline::PipelineDeps;
use crate::queue::IngestQueue;
use crate::scheduler::Scheduler;
use crate::secrets::SecretCodec;
use crate::Result;

/// Assembled runtime: worker pool, scheduler, and the shared pieces the
/// HTTP layer needs. Workers and the scheduler own their own database
/// connections; the HTTP layer shares one behind a mutex.
pub struct Runtime {
    config: Config,
    shared_db: Arc<Mutex<Database>>,
    deps: Arc<PipelineDeps>,
    queue: IngestQueue,
    scheduler: Scheduler,
}

impl Runtime {
    pub fn start(config: Config, secrets: SecretCodec) -> Result<Self> {
        Self::start_with_sink(config, secrets, Box::new(TracingAlertSink))
    }

    pub fn start_with_sink(
        config: Config,
        secrets: SecretCodec,
        sink: Box<dyn AlertSink>,
    ) -> Result<Self> {
        // Opening the shared handle first also runs migrations (and surfaces
        // drift) before any worker spins up
        let shared_db = Arc::new(Mutex::new(Database::open(&config.database_path)?));

        let engine = Arc::new(DetectionEngine::new(config.detector_config()));
        let alerts = Arc::new(AlertDispatcher::new(sink));
        let deps = Arc::new(PipelineDeps {
            registry: Arc::new(Registry::with_all()),
            engine: Arc::clone(&engine),
            secrets,
            alerts: Arc::clone(&alerts),
            access: AccessCheckService::new(config.access_check_ttl_hours),
        });

        let queue = IngestQueue::start(
            config.database_path.clone(),
            config.worker_count,
            config.max_delivery_attempts,
            Arc::clone(&deps),
        )?;

        let scheduler = Scheduler::start(
            config.database_path.clone(),
            Arc::clone(&engine),
            alerts,
            config.clone(),
        )?;

        tracing::info!(
            workers = config.worker_count,
            db = %config.database_path.display(),
            "runtime started"
        );

        Ok(Self {
            config,
            shared_db,
            deps,
            queue,
            scheduler,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn db(&self) -> &Arc<Mutex<Database>> {
        &self.shared_db
    }

    pub fn deps(&self) -> &Arc<PipelineDeps> {
        &self.deps
    }

    pub fn queue(&self) -> &IngestQueue {
        &self.queue
    }

    /// Cooperative shutdown: workers finish their current event, the
    /// scheduler stops immediately
    pub fn shutdown(self) {
        self.scheduler.shutdown();
        self.queue.shutdown();
        tracing::info!("runtime stopped");
    }
}

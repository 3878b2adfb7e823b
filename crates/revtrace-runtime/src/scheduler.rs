use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};

use revtrace_engine::DetectionEngine;
use revtrace_store::{Database, queries};

use crate::access::AccessCheckService;
use crate::alerts::AlertDispatcher;
use crate::config::Config;
use crate::{Error, Result};

/// Scheduled-scan driver: wakes on a fixed tick, walks every org, and runs
/// each detector that is due per its own interval and the detector_runs
/// ledger. One scan per `(org, detector)` at a time by construction: the
/// whole sweep runs on this single thread.
pub struct Scheduler {
    handle: JoinHandle<()>,
    shutdown: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn start(
        db_path: PathBuf,
        engine: Arc<DetectionEngine>,
        alerts: Arc<AlertDispatcher>,
        config: Config,
    ) -> Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let db = Database::open(&db_path)?;

        let handle = std::thread::Builder::new()
            .name("scan-scheduler".to_string())
            .spawn(move || scheduler_loop(db, engine, alerts, config, flag))
            .map_err(|e| Error::InvalidOperation(format!("spawn scheduler: {}", e)))?;

        Ok(Self { handle, shutdown })
    }

    /// Scheduled scans stop immediately; an already-started run is marked
    /// aborted on the ledger
    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.handle.join();
    }
}

fn scheduler_loop(
    mut db: Database,
    engine: Arc<DetectionEngine>,
    alerts: Arc<AlertDispatcher>,
    config: Config,
    shutdown: Arc<AtomicBool>,
) {
    let access = AccessCheckService::new(config.access_check_ttl_hours);
    let tick = Duration::from_secs(config.scheduler_tick_secs.max(1));

    loop {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }

        if let Err(err) = run_sweep(&mut db, &engine, &alerts, &access, &config, &shutdown) {
            tracing::error!(error = %err, "scheduler sweep failed");
        }

        // Sleep in short slices so shutdown stays prompt
        let mut slept = Duration::ZERO;
        while slept < tick {
            if shutdown.load(Ordering::SeqCst) {
                return;
            }
            let nap = Duration::from_millis(200).min(tick - slept);
            std::thread::sleep(nap);
            slept += nap;
        }
    }
}

fn run_sweep(
    db: &mut Database,
    engine: &DetectionEngine,
    alerts: &AlertDispatcher,
    access: &AccessCheckService,
    config: &Config,
    shutdown: &AtomicBool,
) -> Result<()> {
    let now = Utc::now();
    let orgs = queries::orgs::list_ids(db.conn())?;

    for org_id in orgs {
        if shutdown.load(Ordering::SeqCst) {
            return Ok(());
        }

        // Lazy transitions ride along with the scan sweep
        engine.apply_grace_transitions(db.conn(), org_id)?;

        let resolved = engine.auto_resolve_stale_tier2(db.conn(), org_id)?;
        alerts.dispatch_all(db.conn(), &resolved);

        for index in 0..engine.detectors().len() {
            if shutdown.load(Ordering::SeqCst) {
                // Cancellation between start and scan aborts the run row
                let detector = &engine.detectors()[index];
                if let Ok(run_id) =
                    queries::detector_runs::start(db.conn(), org_id, detector.id())
                {
                    let _ = queries::detector_runs::mark_aborted(db.conn(), run_id);
                }
                return Ok(());
            }

            let due = {
                let detector = &engine.detectors()[index];
                detector.supports_scheduled_scan()
                    && engine.is_due(db.conn(), org_id, detector.as_ref(), now)?
            };
            if !due {
                continue;
            }

            let outcome = {
                let detector = &engine.detectors()[index];
                engine.run_scheduled_scan(db, org_id, detector.as_ref())?
            };
            alerts.dispatch_all(db.conn(), &outcome.transitions);
        }
    }

    // Housekeeping shared by all orgs
    let retention_cutoff = now - ChronoDuration::days(config.raw_log_retention_days);
    let pruned = queries::raw_log::prune_older_than(db.conn(), retention_cutoff)?;
    if pruned > 0 {
        tracing::debug!(pruned, "pruned raw webhook log");
    }
    access.prune_expired(db.conn())?;

    Ok(())
}

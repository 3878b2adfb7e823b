use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, TrySendError, sync_channel};
use std::thread::JoinHandle;
use std::time::Duration;

use uuid::Uuid;

use revtrace_store::{Database, queries};
use revtrace_types::Source;

use crate::pipeline::{PipelineDeps, process_delivery};
use crate::{Error, Result};

const CHANNEL_DEPTH: usize = 1024;
const IDLE_POLL: Duration = Duration::from_millis(500);

/// One queued delivery
#[derive(Debug, Clone, Copy)]
pub struct WorkItem {
    pub raw_id: Uuid,
    pub org_id: Uuid,
    pub source: Source,
}

/// Why an enqueue did not take
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// Partition channel is full; the receiver answers 202 and the provider
    /// redelivers
    BackPressure,
    /// Pool is shutting down
    Closed,
}

/// Bounded ingest worker pool. Items are routed by hash of `(org, source)`,
/// so each partition is consumed by exactly one worker in arrival order;
/// across partitions there is no order.
pub struct IngestQueue {
    senders: Vec<SyncSender<WorkItem>>,
    handles: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl IngestQueue {
    pub fn start(
        db_path: PathBuf,
        worker_count: usize,
        max_attempts: i64,
        deps: Arc<PipelineDeps>,
    ) -> Result<Self> {
        let worker_count = worker_count.max(1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut senders = Vec::with_capacity(worker_count);
        let mut handles = Vec::with_capacity(worker_count);

        for index in 0..worker_count {
            let (tx, rx) = sync_channel::<WorkItem>(CHANNEL_DEPTH);
            let db = Database::open(&db_path)?;
            let deps = Arc::clone(&deps);
            let shutdown = Arc::clone(&shutdown);

            let handle = std::thread::Builder::new()
                .name(format!("ingest-worker-{}", index))
                .spawn(move || worker_loop(db, rx, deps, shutdown, max_attempts))
                .map_err(|e| Error::InvalidOperation(format!("spawn worker: {}", e)))?;

            senders.push(tx);
            handles.push(handle);
        }

        Ok(Self {
            senders,
            handles,
            shutdown,
        })
    }

    /// Route an item to its partition worker. Non-blocking: a full channel
    /// is back-pressure, surfaced to the receiver as a retry signal.
    pub fn enqueue(&self, item: WorkItem) -> std::result::Result<(), EnqueueError> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(EnqueueError::Closed);
        }
        let partition = partition_for(item.org_id, item.source, self.senders.len());
        match self.senders[partition].try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(EnqueueError::BackPressure),
            Err(TrySendError::Disconnected(_)) => Err(EnqueueError::Closed),
        }
    }

    /// Cooperative drain: workers finish their current event, then exit
    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        drop(self.senders);
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn partition_for(org_id: Uuid, source: Source, buckets: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    org_id.hash(&mut hasher);
    source.as_str().hash(&mut hasher);
    (hasher.finish() as usize) % buckets
}

fn worker_loop(
    mut db: Database,
    rx: Receiver<WorkItem>,
    deps: Arc<PipelineDeps>,
    shutdown: Arc<AtomicBool>,
    max_attempts: i64,
) {
    loop {
        let item = match rx.recv_timeout(IDLE_POLL) {
            Ok(item) => item,
            Err(RecvTimeoutError::Timeout) => {
                if shutdown.load(Ordering::SeqCst) {
                    return;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => return,
        };

        process_with_retry(&mut db, &deps, item, max_attempts);

        // A cancelled worker completes the current delivery, then exits
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
    }
}

/// Transient failures reschedule with exponential backoff up to the attempt
/// budget; exhaustion marks the row failed for manual inspection. Panics are
/// caught at this boundary and treated like any other internal error.
fn process_with_retry(db: &mut Database, deps: &PipelineDeps, item: WorkItem, max_attempts: i64) {
    loop {
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
            process_delivery(db, deps, item.raw_id)
        }));

        let error_message = match result {
            Ok(Ok(outcome)) => {
                tracing::debug!(raw = %item.raw_id, outcome = ?outcome, "delivery settled");
                return;
            }
            Ok(Err(err)) => err.to_string(),
            Err(panic) => format!("worker panic: {}", panic_message(&panic)),
        };

        let attempts = match queries::raw_log::bump_attempts(db.conn(), item.raw_id) {
            Ok(attempts) => attempts,
            Err(err) => {
                tracing::error!(raw = %item.raw_id, error = %err, "attempt bookkeeping failed");
                return;
            }
        };

        if attempts >= max_attempts {
            tracing::error!(
                raw = %item.raw_id,
                attempts,
                error = %error_message,
                "delivery failed; retry budget exhausted"
            );
            if let Err(err) = queries::raw_log::mark_failed(db.conn(), item.raw_id, &error_message) {
                tracing::error!(raw = %item.raw_id, error = %err, "could not mark delivery failed");
            }
            return;
        }

        let backoff = Duration::from_millis(250u64.saturating_mul(1 << attempts.min(6) as u32));
        tracing::warn!(
            raw = %item.raw_id,
            attempts,
            backoff_ms = backoff.as_millis() as u64,
            error = %error_message,
            "transient delivery failure; retrying"
        );
        std::thread::sleep(backoff);
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_is_stable_per_org_source() {
        let org = Uuid::new_v4();
        let a = partition_for(org, Source::Stripe, 4);
        let b = partition_for(org, Source::Stripe, 4);
        assert_eq!(a, b);
    }

    #[test]
    fn partitions_stay_in_range() {
        for _ in 0..100 {
            let p = partition_for(Uuid::new_v4(), Source::Recurly, 3);
            assert!(p < 3);
        }
    }
}

// NOTE: Runtime Architecture Rationale
//
// Why a partitioned worker pool (not one queue, many consumers)?
// - Ordering is promised per (org, source); hashing that tuple onto a fixed
//   worker gives the guarantee without any cross-thread coordination
// - Across partitions there is deliberately no order
//
// Why does the receiver not verify signatures?
// - A delivery with a bad signature must still land in the raw log so a
//   misconfigured secret is diagnosable; the worker marks it skipped
//
// Why one SQLite connection per worker?
// - rusqlite connections are not Sync; WAL lets per-worker connections and
//   the HTTP layer's shared one proceed without blocking each other

mod access;
mod alerts;
mod backfill;
mod config;
mod error;
mod health;
mod pipeline;
mod queue;
mod runtime;
mod scheduler;
mod secrets;

pub use access::{AccessCheckService, MAX_BATCH, RecordedCheck};
pub use alerts::{AlertDispatcher, AlertSink, TracingAlertSink};
pub use backfill::{BackfillDriver, BackfillPayload, BackfillStats};
pub use config::{Config, DetectorTuning};
pub use error::{Error, Result};
pub use health::connection_health;
pub use pipeline::{DeliveryOutcome, PipelineDeps, process_delivery};
pub use queue::{EnqueueError, IngestQueue, WorkItem};
pub use runtime::Runtime;
pub use scheduler::Scheduler;
pub use secrets::SecretCodec;

// NOTE: Normalizer Architecture Rationale
//
// Why verify in the worker (not the receiver)?
// - Deliveries with bad signatures still land in the raw log, so an operator
//   can diagnose a misconfigured secret instead of staring at silent 401s
// - The receiver's only durability job is the raw row; everything
//   provider-specific happens behind the queue
//
// Why typed payload models with #[serde(default)] everywhere?
// - Provider schemas drift without notice; a missing optional field must
//   degrade enrichment, not fail the delivery
// - Truly required fields (event id, event type) stay required so malformed
//   payloads fail fast with a terminal parse error
//
// Why deterministic event ids?
// - Redelivery and backfill retries regenerate byte-identical rows; the
//   idempotency-key conflict then collapses them into no-ops

mod apple;
mod builder;
mod enrich;
mod error;
mod google;
mod jws;
mod recurly;
mod registry;
mod signature;
mod stripe;
mod traits;

pub use builder::{EventBuilder, FanoutSuffix};
pub use error::{Error, Result};
pub use registry::{NormalizerMetadata, Registry, create, get_all_normalizers};
pub use signature::{REPLAY_TOLERANCE_SECS, hmac_sha256_hex};
pub use traits::{EventDescriptor, Normalizer, RawDelivery};

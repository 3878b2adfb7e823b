// NOTE: Schema Design Goals
//
// 1. Normalization: Abstract provider-specific quirks into one canonical event stream
//    - Stripe: diff composite subscription updates into discrete events
//    - Apple: unwrap double-JWS notification payloads into flat transactions
//    - Google: decode Pub/Sub envelopes and integer notification codes
//    - Recurly: align notification vocabulary with the canonical enum
//
// 2. Traceability: Every canonical event keeps its source event type and raw payload
//    so any projection or issue can be walked back to the provider delivery
//
// 3. Replayability: Events are immutable and idempotency-keyed; replaying the
//    stream in event_time order must reproduce entitlement state exactly
//
// 4. Separation: Identity (who) is resolved after normalization (what happened),
//    so events without identity hints still enter the stream

mod access;
mod entitlement;
mod error;
mod event;
mod identity;
mod issue;
mod util;

pub use access::AccessCheck;
pub use entitlement::{Entitlement, EntitlementState};
pub use error::{Error, Result};
pub use event::{CanonicalEvent, EventStatus, EventType, ProcessingStatus, Source};
pub use identity::{IdType, IdentityHint, User, UserIdentity, email_key};
pub use issue::{
    DetectedIssue, DetectionTier, DetectorCategory, DetectorScope, Issue, IssueSeverity,
    IssueStatus,
};
pub use util::derive_billing_interval;

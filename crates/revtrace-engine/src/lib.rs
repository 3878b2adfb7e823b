// NOTE: Engine Design Rationale
//
// Why identity resolution after normalization (not inside it)?
// - Normalizers only know their own provider's identifiers; convergence
//   across providers needs the whole identity graph
// - Events without hints still enter the canonical stream (aggregate-only
//   signals like delivery gaps have no subject)
//
// Why per-event detectors in the worker thread?
// - A detector reading the entitlement it just projected must observe that
//   write; running inline preserves the happens-before chain without locks
//
// Why detectors return findings instead of writing issues?
// - Dedup against the open-issue set is one policy, owned by the engine;
//   detectors stay pure and testable

mod detector;
mod detectors;
mod engine;
mod error;
mod identity;
mod issues;
mod product_family;
mod projection;

pub use detector::{Detector, DetectorConfig, DetectorContext};
pub use detectors::all as all_detectors;
pub use engine::{DetectionEngine, ScanOutcome};
pub use error::{Error, Result};
pub use identity::{Resolution, resolve_event_identity};
pub use issues::{IssueTransition, ReconcileStats, reconcile, transition_issue};
pub use product_family::product_family;
pub use projection::{ProjectionOutcome, next_state, project_event, replay_projection};

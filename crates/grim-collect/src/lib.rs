//! Live event acquisition and reconciliation for clocktower sessions.
//!
//! Collects the WebSocket event stream into an append-only buffer, decides
//! when enough of the session has been observed, and reconciles the live
//! buffer against the authoritative REST event log into one de-duplicated,
//! seq-ordered list.

mod collector;
mod detector;
mod event;
mod reconcile;

pub use collector::{
    CollectorExit, CollectorHandle, CollectorOutput, CollectorSnapshot, EnvelopeSource,
};
pub use detector::{Quorum, StopDecision, StopPolicy, StopReason};
pub use event::GameEvent;
pub use reconcile::{divergence, reconcile, Divergence, Provenance, ReconciledLog};

//! Reconciliation Engine
//!
//! Turns directory events into transactional per-node link deltas and runs
//! the full resync that the controller schedules.

pub mod engine;
pub mod retry;

pub use engine::{ReconcileOutcome, Reconciler, ReconcilerConfig, ResyncReport};
pub use retry::RetryPolicy;

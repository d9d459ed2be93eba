//! Hierarchical quota accounting: entitlement tuning, sub-namespace admission,
//! expiry scheduling and node rewards.

pub mod admission;
pub mod aggregate;
pub mod capacity;
pub mod engine;
pub mod eviction;
pub mod expiry;
pub mod reward;
pub mod tuner;
pub mod workqueue;

#[cfg(test)]
pub(crate) mod testutil;

pub use admission::{AdmissionGate, AdmissionOutcome};
pub use engine::{EngineConfig, EngineHandle, QuotaEngine, Reconcile};
pub use tuner::{QuotaTuner, TuneOutcome};

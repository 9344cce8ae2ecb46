//! Instance coordination: who owns the session, and is it ready.
//!
//! - `lease` - Lease file, primary/proxy election and background renewal
//! - `state` - Readiness record published by the primary

pub mod lease;
pub mod state;

pub use lease::{LeaseKeeper, LeaseManager, LeaseOutcome, LeaseRecord, LeaseStatus, StaleReason};
pub use state::{ReadinessRecord, StatePublisher};

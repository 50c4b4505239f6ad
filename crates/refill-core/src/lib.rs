//! Scheduling core for refilld
//!
//! This crate decides when to look at the dashboard and what to do about it:
//! - Reset policy (threshold rule, daily time window rule)
//! - Adaptive polling cadence and failure backoff
//! - Loop state machine (Idle -> Fetching -> Deciding -> Resetting -> Sleeping)
//! - The schedule loop that drives the dashboard and alerter capabilities

mod cadence;
mod clock;
mod events;
mod policy;
mod scheduler;
mod state;

pub use cadence::*;
pub use clock::*;
pub use events::*;
pub use policy::*;
pub use scheduler::*;
pub use state::*;

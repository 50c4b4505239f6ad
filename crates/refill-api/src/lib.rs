//! Domain types for refilld
//!
//! This crate defines the values that flow between the scheduler and its
//! capabilities:
//! - Usage snapshots read from the dashboard
//! - Reset decisions and their reasons
//! - Reset acknowledgements and attempt outcomes
//! - Per-iteration reports

mod report;
mod types;

pub use report::*;
pub use types::*;

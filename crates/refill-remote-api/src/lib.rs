//! Capability interfaces for refilld
//!
//! This crate defines the narrow interface between the scheduling core and
//! the outside world: a dashboard that reports usage and accepts resets, and
//! an alerter that delivers notifications. It contains no network code itself.
//! Scriptable mocks of both live here for tests.

mod mock;
mod traits;

pub use mock::*;
pub use traits::*;

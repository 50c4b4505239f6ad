//! Shared utilities for refilld
//!
//! This crate provides:
//! - Time utilities (mockable clock, reference timezone, daily reset window)
//! - Error types
//! - Single-instance guard backed by an advisory file lock
//! - Default paths for the config and lock files

mod error;
mod instance;
mod paths;
mod time;

pub use error::*;
pub use instance::*;
pub use paths::*;
pub use time::*;

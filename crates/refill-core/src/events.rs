//! Events emitted by the schedule loop

use chrono::{DateTime, FixedOffset};
use refill_api::IterationReport;
use std::time::Duration;

/// Events emitted by the schedule loop
#[derive(Debug, Clone)]
pub enum LoopEvent {
    /// An iteration finished (successfully or not)
    IterationCompleted(IterationReport),

    /// The loop is going to sleep
    Sleeping {
        duration: Duration,
        wake_at: DateTime<FixedOffset>,
    },

    /// The loop stopped because shutdown was requested
    Stopped,
}

//! Loop state machine

use chrono::{DateTime, FixedOffset};
use refill_api::UsageSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where the loop currently is.
///
/// Idle -> Fetching -> {Deciding | Alerting}; Deciding -> {Resetting | Sleeping};
/// Resetting -> {Sleeping | Alerting}; Alerting -> Sleeping; Sleeping -> Idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Idle,
    Fetching,
    Deciding,
    Resetting,
    Alerting,
    Sleeping,
}

impl LoopPhase {
    /// Whether `next` may directly follow this phase
    pub fn can_transition_to(self, next: LoopPhase) -> bool {
        use LoopPhase::*;
        matches!(
            (self, next),
            (Idle, Fetching)
                | (Fetching, Deciding)
                | (Fetching, Alerting)
                | (Deciding, Resetting)
                | (Deciding, Sleeping)
                | (Resetting, Sleeping)
                | (Resetting, Alerting)
                | (Alerting, Sleeping)
                | (Sleeping, Idle)
        )
    }
}

impl fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Deciding => "deciding",
            Self::Resetting => "resetting",
            Self::Alerting => "alerting",
            Self::Sleeping => "sleeping",
        };
        f.write_str(s)
    }
}

/// What the loop remembers between iterations. Lives in memory only; a
/// restarted process simply starts polling again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleState {
    pub phase: LoopPhase,
    pub last_evaluation: Option<DateTime<FixedOffset>>,
    pub next_wake: Option<DateTime<FixedOffset>>,
    pub consecutive_failures: u32,
    /// Most recent successful reading, carried into alert bodies
    pub last_snapshot: Option<UsageSnapshot>,
    pub iterations: u64,
}

impl ScheduleState {
    pub fn new() -> Self {
        Self {
            phase: LoopPhase::Idle,
            last_evaluation: None,
            next_wake: None,
            consecutive_failures: 0,
            last_snapshot: None,
            iterations: 0,
        }
    }

    /// Move to `next`, logging transitions outside the documented graph
    pub fn enter(&mut self, next: LoopPhase) {
        if self.phase != next && !self.phase.can_transition_to(next) {
            tracing::debug!(from = %self.phase, to = %next, "Out-of-band phase change");
        }
        self.phase = next;
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Returns the new consecutive failure count
    pub fn record_failure(&mut self) -> u32 {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_failures
    }
}

impl Default for ScheduleState {
    fn default() -> Self {
        Self::new()
    }
}

//! Shared types for refilld

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A point-in-time reading of the dashboard's consumed/total counter.
///
/// `current <= ceiling` is typical but not guaranteed; the dashboard briefly
/// reports values above the ceiling right after a reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub current: u64,
    pub ceiling: u64,
    pub observed_at: DateTime<FixedOffset>,
}

impl UsageSnapshot {
    pub fn new(current: u64, ceiling: u64, observed_at: DateTime<FixedOffset>) -> Self {
        Self {
            current,
            ceiling,
            observed_at,
        }
    }

    /// `round(current / ceiling * 100)`; may exceed 100
    pub fn percentage(&self) -> u64 {
        if self.ceiling == 0 {
            return 0;
        }
        let rounded = (self.current as u128 * 100 + self.ceiling as u128 / 2) / self.ceiling as u128;
        u64::try_from(rounded).unwrap_or(u64::MAX)
    }

    pub fn exceeds_ceiling(&self) -> bool {
        self.current > self.ceiling
    }
}

impl fmt::Display for UsageSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} ({}%)",
            group_thousands(self.current),
            group_thousands(self.ceiling),
            self.percentage()
        )
    }
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Why a reset was or was not requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetReason {
    /// Usage dropped below the configured threshold
    BelowThreshold,
    /// The daily reset window is open
    InTimeWindow,
    /// Neither rule applied
    NoneMatched,
}

impl fmt::Display for ResetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BelowThreshold => "below threshold",
            Self::InTimeWindow => "in time window",
            Self::NoneMatched => "none matched",
        };
        f.write_str(s)
    }
}

/// Result of one policy evaluation. Produced fresh every iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetDecision {
    pub should_reset: bool,
    pub reason: ResetReason,
}

impl ResetDecision {
    pub fn reset(reason: ResetReason) -> Self {
        Self {
            should_reset: true,
            reason,
        }
    }

    pub fn hold() -> Self {
        Self {
            should_reset: false,
            reason: ResetReason::NoneMatched,
        }
    }
}

/// What the dashboard did when asked to reset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetAck {
    /// The reset control was triggered and the remote confirmed it
    Performed,
    /// Today's reset quota was already spent; nothing was changed
    AlreadyUsed,
}

/// Outcome of a single reset attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptOutcome {
    pub succeeded: bool,
    pub snapshot_before: Option<UsageSnapshot>,
    pub snapshot_after: Option<UsageSnapshot>,
    pub error_detail: Option<String>,
    /// The remote reported the day's quota as already used
    pub already_used: bool,
}

impl AttemptOutcome {
    pub fn from_ack(
        ack: ResetAck,
        snapshot_before: Option<UsageSnapshot>,
        snapshot_after: Option<UsageSnapshot>,
    ) -> Self {
        Self {
            succeeded: true,
            snapshot_before,
            snapshot_after,
            error_detail: None,
            already_used: ack == ResetAck::AlreadyUsed,
        }
    }

    pub fn failed(snapshot_before: Option<UsageSnapshot>, detail: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            snapshot_before,
            snapshot_after: None,
            error_detail: Some(detail.into()),
            already_used: false,
        }
    }

    /// Latest snapshot known around this attempt
    pub fn last_known_snapshot(&self) -> Option<&UsageSnapshot> {
        self.snapshot_after.as_ref().or(self.snapshot_before.as_ref())
    }
}

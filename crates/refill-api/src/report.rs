//! Per-iteration reports

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{AttemptOutcome, ResetDecision, UsageSnapshot};

/// Failure classes that end an iteration early
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Could not obtain a usage snapshot (network, auth, parse, timeout)
    Fetch,
    /// Reset attempted but the remote did not confirm it
    Reset,
    /// Notification delivery failed. Logged only, never re-alerted.
    Alert,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Fetch => "FetchFailure",
            Self::Reset => "ResetFailure",
            Self::Alert => "AlertFailure",
        };
        f.write_str(s)
    }
}

/// A failure with its detail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationFailure {
    pub kind: FailureKind,
    pub detail: String,
}

impl IterationFailure {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// Everything one pass of the loop observed and did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationReport {
    pub started_at: DateTime<FixedOffset>,
    pub snapshot: Option<UsageSnapshot>,
    pub decision: Option<ResetDecision>,
    pub attempt: Option<AttemptOutcome>,
    pub failure: Option<IterationFailure>,
    /// Whether the alerter accepted the failure notification
    pub alerted: bool,
}

impl IterationReport {
    pub fn new(started_at: DateTime<FixedOffset>) -> Self {
        Self {
            started_at,
            snapshot: None,
            decision: None,
            attempt: None,
            failure: None,
            alerted: false,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }

    pub fn attempted_reset(&self) -> bool {
        self.attempt.is_some()
    }

    /// Latest usage reading from this iteration, if any
    pub fn last_known_snapshot(&self) -> Option<&UsageSnapshot> {
        self.attempt
            .as_ref()
            .and_then(AttemptOutcome::last_known_snapshot)
            .or(self.snapshot.as_ref())
    }
}

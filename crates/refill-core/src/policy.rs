//! Reset policy

use chrono::{DateTime, TimeZone};
use refill_api::{ResetDecision, ResetReason, UsageSnapshot};
use refill_config::ScheduleConfig;
use refill_util::DailyWindow;

/// Decides whether the counter should be reset right now.
///
/// Pure: the same snapshot and civil time always give the same decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetPolicy {
    pub threshold: u64,
    pub window: DailyWindow,
}

impl ResetPolicy {
    pub fn new(threshold: u64, window: DailyWindow) -> Self {
        Self { threshold, window }
    }

    pub fn from_schedule(schedule: &ScheduleConfig) -> Self {
        Self::new(schedule.threshold, schedule.window)
    }

    /// First matching rule wins: low usage, then the daily window.
    ///
    /// `now` must already be expressed in the reference timezone.
    pub fn decide<Tz: TimeZone>(&self, snapshot: &UsageSnapshot, now: &DateTime<Tz>) -> ResetDecision {
        if snapshot.current < self.threshold {
            ResetDecision::reset(ResetReason::BelowThreshold)
        } else if self.window.contains(now) {
            ResetDecision::reset(ResetReason::InTimeWindow)
        } else {
            ResetDecision::hold()
        }
    }
}

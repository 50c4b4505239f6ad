//! Adaptive polling cadence
//!
//! The loop polls rarely while the reset window is far away and tightens as
//! it approaches: `far` until 30 minutes out, `mid` until 5 minutes out,
//! `near` after that. Sleeps are trimmed so they end on a band boundary
//! instead of overshooting it.

use chrono::{DateTime, FixedOffset};
use refill_config::ScheduleConfig;
use refill_util::DailyWindow;
use std::time::Duration;

/// Distance to the window below which `poll_interval_mid` applies
pub const MID_BAND: Duration = Duration::from_secs(30 * 60);

/// Distance to the window below which `poll_interval_near` applies
pub const NEAR_BAND: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    pub window: DailyWindow,
    pub far: Duration,
    pub mid: Duration,
    pub near: Duration,
    pub retry_delay: Duration,
}

impl Cadence {
    pub fn from_schedule(schedule: &ScheduleConfig) -> Self {
        Self {
            window: schedule.window,
            far: schedule.poll_interval_far,
            mid: schedule.poll_interval_mid,
            near: schedule.poll_interval_near,
            retry_delay: schedule.retry_delay,
        }
    }

    /// Sleep after a clean iteration that did not reset inside the window
    pub fn next_poll(&self, now: &DateTime<FixedOffset>) -> Duration {
        let until = self.window.until_start(now);

        if until.is_zero() {
            self.near
        } else if until <= NEAR_BAND {
            self.near.min(until)
        } else if until <= MID_BAND {
            self.mid.min(until - NEAR_BAND)
        } else {
            self.far.min(until - MID_BAND)
        }
    }

    /// Sleep after a reset attempt inside the window: through to shortly
    /// before the next day's window, so the near cadence picks it up
    pub fn after_window_attempt(&self, now: &DateTime<FixedOffset>) -> Duration {
        let until_next = self.until_next_start(now);
        match until_next.checked_sub(NEAR_BAND) {
            Some(sleep) if !sleep.is_zero() => sleep,
            _ => self.near.min(until_next),
        }
    }

    /// Sleep after the `consecutive_failures`-th failure in a row:
    /// `retry_delay * 2^(n-1)`, capped by `far` and by the next window start
    pub fn backoff(&self, consecutive_failures: u32, now: &DateTime<FixedOffset>) -> Duration {
        let exponent = consecutive_failures.saturating_sub(1).min(16);
        let delay = self
            .retry_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.far);

        delay.min(self.far).min(self.until_next_start(now))
    }

    fn until_next_start(&self, now: &DateTime<FixedOffset>) -> Duration {
        (self.window.next_start_after(now) - *now)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

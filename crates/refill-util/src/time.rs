//! Time utilities for refilld
//!
//! Provides the mockable wall clock, the reference timezone the reset window
//! is expressed in, and the daily reset window itself.
//!
//! # Mock Time for Development
//!
//! In debug builds, the `REFILL_MOCK_TIME` environment variable can be set
//! to override the system time for all time-sensitive operations. This is useful
//! for exercising the reset window without waiting for midnight.
//!
//! Format: `YYYY-MM-DD HH:MM:SS` (e.g., `2025-12-25 23:57:30`)
//!
//! Example:
//! ```bash
//! REFILL_MOCK_TIME="2025-12-25 23:57:30" cargo run -p refilld -- --check
//! ```

use chrono::{
    DateTime, FixedOffset, Local, NaiveDateTime, NaiveTime, Offset, TimeZone, Timelike,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use crate::{RefillError, Result};

/// Environment variable name for mock time (debug builds only)
pub const MOCK_TIME_ENV_VAR: &str = "REFILL_MOCK_TIME";

/// Cached mock time offset from the real time when the process started.
/// This allows mock time to advance naturally.
static MOCK_TIME_OFFSET: OnceLock<Option<chrono::Duration>> = OnceLock::new();

#[allow(clippy::disallowed_methods)] // This is the internal implementation that wraps Local::now()
fn get_mock_time_offset() -> Option<chrono::Duration> {
    *MOCK_TIME_OFFSET.get_or_init(|| {
        #[cfg(debug_assertions)]
        {
            if let Ok(mock_time_str) = std::env::var(MOCK_TIME_ENV_VAR) {
                match parse_mock_time(&mock_time_str) {
                    Some(naive_dt) => {
                        if let Some(mock_dt) = Local.from_local_datetime(&naive_dt).single() {
                            let offset = mock_dt.signed_duration_since(chrono::Local::now());
                            tracing::info!(
                                mock_time = %mock_time_str,
                                offset_secs = offset.num_seconds(),
                                "Mock time enabled"
                            );
                            return Some(offset);
                        }
                        tracing::warn!(
                            mock_time = %mock_time_str,
                            "Failed to convert mock time to local timezone"
                        );
                    }
                    None => {
                        tracing::warn!(
                            mock_time = %mock_time_str,
                            expected_format = "%Y-%m-%d %H:%M:%S",
                            "Invalid mock time format"
                        );
                    }
                }
            }
            None
        }
        #[cfg(not(debug_assertions))]
        {
            None
        }
    })
}

/// Parse a `REFILL_MOCK_TIME` value (`YYYY-MM-DD HH:MM:SS`, local time)
pub fn parse_mock_time(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S").ok()
}

/// Get the current local time, respecting mock time settings in debug builds.
#[allow(clippy::disallowed_methods)] // This is the wrapper that provides mock time support
pub fn now() -> DateTime<Local> {
    let real_now = chrono::Local::now();

    match get_mock_time_offset() {
        Some(offset) => real_now + offset,
        None => real_now,
    }
}

/// Format a DateTime for logs and alert bodies.
pub fn format_datetime_full<Tz: TimeZone>(dt: &DateTime<Tz>) -> String
where
    Tz::Offset: fmt::Display,
{
    dt.format("%Y-%m-%d %H:%M:%S %:z").to_string()
}

/// The timezone the reset window is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceZone {
    /// Whatever the host considers local time
    Local,
    /// A fixed UTC offset, e.g. `+08:00`
    Fixed(FixedOffset),
    /// An IANA zone such as `Asia/Shanghai`, following its DST rules
    Named(Tz),
}

impl ReferenceZone {
    /// Current civil time in this zone
    pub fn now(&self) -> DateTime<FixedOffset> {
        self.convert(&now())
    }

    /// Express an instant in this zone
    pub fn convert<Tz: TimeZone>(&self, dt: &DateTime<Tz>) -> DateTime<FixedOffset> {
        match self {
            Self::Local => dt.with_timezone(&Local).fixed_offset(),
            Self::Fixed(offset) => dt.with_timezone(offset),
            Self::Named(tz) => dt.with_timezone(tz).fixed_offset(),
        }
    }
}

impl Default for ReferenceZone {
    fn default() -> Self {
        Self::Local
    }
}

impl FromStr for ReferenceZone {
    type Err = RefillError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        match trimmed.to_lowercase().as_str() {
            "local" => return Ok(Self::Local),
            "utc" | "z" => return Ok(Self::Fixed(chrono::Utc.fix())),
            _ => {}
        }

        let (sign, rest) = match trimmed.as_bytes().first() {
            Some(b'+') => (1, &trimmed[1..]),
            Some(b'-') => (-1, &trimmed[1..]),
            _ => {
                return trimmed
                    .parse::<Tz>()
                    .map(Self::Named)
                    .map_err(|_| RefillError::InvalidTimezone(s.to_string()));
            }
        };

        let (hours, minutes) =
            parse_hh_mm(rest).map_err(|_| RefillError::InvalidTimezone(s.to_string()))?;
        if hours > 14 {
            return Err(RefillError::InvalidTimezone(s.to_string()));
        }

        let seconds = sign * (hours as i32 * 3600 + minutes as i32 * 60);
        FixedOffset::east_opt(seconds)
            .map(Self::Fixed)
            .ok_or_else(|| RefillError::InvalidTimezone(s.to_string()))
    }
}

impl fmt::Display for ReferenceZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Fixed(offset) => write!(f, "{}", offset),
            Self::Named(tz) => f.write_str(tz.name()),
        }
    }
}

/// Hour and minute of a civil day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WallClock {
    pub hour: u8,
    pub minute: u8,
}

impl WallClock {
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(Self { hour, minute })
        } else {
            None
        }
    }

    pub fn to_naive_time(self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour as u32, self.minute as u32, 0).unwrap_or(NaiveTime::MIN)
    }

    /// Truncates to the minute
    pub fn from_naive_time(time: NaiveTime) -> Self {
        Self {
            hour: time.hour() as u8,
            minute: time.minute() as u8,
        }
    }

    /// Returns seconds since midnight
    pub fn as_seconds_from_midnight(&self) -> u32 {
        (self.hour as u32) * 3600 + (self.minute as u32) * 60
    }
}

impl PartialOrd for WallClock {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WallClock {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_seconds_from_midnight()
            .cmp(&other.as_seconds_from_midnight())
    }
}

impl FromStr for WallClock {
    type Err = RefillError;

    fn from_str(s: &str) -> Result<Self> {
        let (hour, minute) = parse_hh_mm(s).map_err(|message| RefillError::invalid_time(s, message))?;
        Self::new(hour, minute).ok_or_else(|| RefillError::invalid_time(s, "out of range"))
    }
}

impl fmt::Display for WallClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Parse HH:MM, checking ranges
pub fn parse_hh_mm(s: &str) -> std::result::Result<(u8, u8), String> {
    let parts: Vec<&str> = s.trim().split(':').collect();
    if parts.len() != 2 {
        return Err("Expected HH:MM format".into());
    }

    let hour: u8 = parts[0].parse().map_err(|_| "Invalid hour".to_string())?;
    let minute: u8 = parts[1].parse().map_err(|_| "Invalid minute".to_string())?;

    if hour >= 24 {
        return Err("Hour must be 0-23".into());
    }
    if minute >= 60 {
        return Err("Minute must be 0-59".into());
    }

    Ok((hour, minute))
}

/// The daily interval in which a reset is timely regardless of usage.
///
/// Both bounds are inclusive at minute granularity: `23:58`-`23:59` covers
/// 23:58:00 through 23:59:59. A window whose start is after its end wraps
/// past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyWindow {
    pub start: WallClock,
    pub end: WallClock,
}

impl DailyWindow {
    pub fn new(start: WallClock, end: WallClock) -> Self {
        Self { start, end }
    }

    pub fn wraps_midnight(&self) -> bool {
        self.start > self.end
    }

    /// Check if the given civil time falls within this window
    pub fn contains<Tz: TimeZone>(&self, dt: &DateTime<Tz>) -> bool {
        let time = WallClock::from_naive_time(dt.time());

        if self.wraps_midnight() {
            time >= self.start || time <= self.end
        } else {
            time >= self.start && time <= self.end
        }
    }

    /// The first start of this window strictly after `now`.
    ///
    /// When `now` is inside the window this is the next day's start.
    pub fn next_start_after(&self, now: &DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        let today = at_civil_time(now, self.start);
        if today > *now {
            today
        } else {
            today + chrono::Duration::days(1)
        }
    }

    /// Time until the window opens, zero if it is already open
    pub fn until_start(&self, now: &DateTime<FixedOffset>) -> Duration {
        if self.contains(now) {
            return Duration::ZERO;
        }
        (self.next_start_after(now) - *now)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

impl fmt::Display for DailyWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// The instant on `reference`'s civil date at `clock`, in `reference`'s offset
fn at_civil_time(reference: &DateTime<FixedOffset>, clock: WallClock) -> DateTime<FixedOffset> {
    let offset = *reference.offset();
    let local = reference.date_naive().and_time(clock.to_naive_time());
    let utc = local - chrono::Duration::seconds(offset.local_minus_utc() as i64);
    DateTime::from_naive_utc_and_offset(utc, offset)
}

/// Helper to format durations in human-readable form
pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

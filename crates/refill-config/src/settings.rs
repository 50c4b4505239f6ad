//! Validated settings

use crate::schema::{RawConfig, RawDashboard, RawEmail, RawSchedule, RawServiceConfig};
use crate::validation::url_origin;
use refill_util::{DailyWindow, ReferenceZone, WallClock, default_lock_path};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_THRESHOLD: u64 = 500;
pub const DEFAULT_WINDOW_START: WallClock = WallClock {
    hour: 23,
    minute: 58,
};
pub const DEFAULT_WINDOW_END: WallClock = WallClock {
    hour: 23,
    minute: 59,
};
pub const DEFAULT_POLL_INTERVAL_FAR_MS: u64 = 30 * 60 * 1000;
pub const DEFAULT_POLL_INTERVAL_MID_MS: u64 = 60 * 1000;
pub const DEFAULT_POLL_INTERVAL_NEAR_MS: u64 = 30 * 1000;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 60 * 1000;
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 45 * 1000;

pub const DEFAULT_USAGE_SELECTOR: &str = "div.text-2xl.font-bold.text-primary";
pub const DEFAULT_RESET_BUTTON_KEYWORDS: &[&str] = &["重置积分", "重置", "reset"];
pub const DEFAULT_EXHAUSTED_MARKERS: &[&str] = &["已用完"];
pub const DEFAULT_EMAIL_SUBJECT: &str = "refilld alert";

/// Environment variable replacing `[dashboard] password`
pub const DASHBOARD_PASSWORD_ENV: &str = "REFILL_DASHBOARD_PASSWORD";
/// Environment variable replacing `[email.smtp] password`
pub const SMTP_PASSWORD_ENV: &str = "REFILL_SMTP_PASSWORD";

/// A credential that never shows up in `Debug` output or logs
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Secrets supplied through the environment instead of the file
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub dashboard_password: Option<String>,
    pub smtp_password: Option<String>,
}

impl EnvOverrides {
    /// Read the override variables from the process environment
    pub fn from_env() -> Self {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            dashboard_password: read(DASHBOARD_PASSWORD_ENV),
            smtp_password: read(SMTP_PASSWORD_ENV),
        }
    }

    /// Overwrite the matching raw fields
    pub fn apply(&self, raw: &mut RawConfig) {
        if let Some(password) = &self.dashboard_password {
            raw.dashboard.password = Some(password.clone());
        }
        if let Some(password) = &self.smtp_password
            && let Some(email) = raw.email.as_mut()
        {
            email.smtp.password = Some(password.clone());
        }
    }
}

/// Validated settings ready for use by the service
#[derive(Debug, Clone)]
pub struct Settings {
    pub schedule: ScheduleConfig,
    pub dashboard: DashboardConfig,
    /// `None` when `[email]` is absent or disabled
    pub email: Option<EmailConfig>,
    pub service: ServiceConfig,
}

impl Settings {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            schedule: ScheduleConfig::from_raw(raw.schedule),
            dashboard: DashboardConfig::from_raw(raw.dashboard),
            email: raw
                .email
                .filter(|email| email.enabled)
                .map(EmailConfig::from_raw),
            service: ServiceConfig::from_raw(raw.service),
        }
    }
}

/// Reset policy parameters and polling cadence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub threshold: u64,
    pub window: DailyWindow,
    pub timezone: ReferenceZone,
    pub poll_interval_far: Duration,
    pub poll_interval_mid: Duration,
    pub poll_interval_near: Duration,
    pub retry_delay: Duration,
    pub call_timeout: Duration,
}

impl ScheduleConfig {
    fn from_raw(raw: RawSchedule) -> Self {
        let clock = |value: Option<String>, default: WallClock| {
            value
                .and_then(|v| v.parse::<WallClock>().ok())
                .unwrap_or(default)
        };
        let millis = |value: Option<u64>, default: u64| Duration::from_millis(value.unwrap_or(default));

        Self {
            threshold: raw.threshold.unwrap_or(DEFAULT_THRESHOLD),
            window: DailyWindow::new(
                clock(raw.window_start, DEFAULT_WINDOW_START),
                clock(raw.window_end, DEFAULT_WINDOW_END),
            ),
            timezone: raw
                .timezone
                .and_then(|tz| tz.parse().ok())
                .unwrap_or_default(),
            poll_interval_far: millis(raw.poll_interval_far_ms, DEFAULT_POLL_INTERVAL_FAR_MS),
            poll_interval_mid: millis(raw.poll_interval_mid_ms, DEFAULT_POLL_INTERVAL_MID_MS),
            poll_interval_near: millis(raw.poll_interval_near_ms, DEFAULT_POLL_INTERVAL_NEAR_MS),
            retry_delay: millis(raw.retry_delay_ms, DEFAULT_RETRY_DELAY_MS),
            call_timeout: millis(raw.call_timeout_ms, DEFAULT_CALL_TIMEOUT_MS),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self::from_raw(RawSchedule::default())
    }
}

/// How the dashboard is driven
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DashboardBackend {
    /// Plain HTTP requests with cookie replay
    Http,
}

impl fmt::Display for DashboardBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => f.write_str("http"),
        }
    }
}

/// Dashboard endpoints, credentials and markup hints
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub backend: DashboardBackend,
    pub login_url: String,
    pub dashboard_url: String,
    pub session_url: String,
    pub credentials_url: String,
    pub reset_url: String,
    pub username: String,
    pub password: Secret,
    pub usage_selector: String,
    pub reset_button_keywords: Vec<String>,
    pub exhausted_markers: Vec<String>,
}

impl DashboardConfig {
    fn from_raw(raw: RawDashboard) -> Self {
        let origin = url_origin(&raw.login_url).unwrap_or_default();
        let derived = |value: Option<String>, path: &str| {
            value.unwrap_or_else(|| format!("{}{}", origin, path))
        };
        let words = |value: Option<Vec<String>>, default: &[&str]| {
            value
                .map(|list| {
                    list.into_iter()
                        .map(|w| w.trim().to_string())
                        .filter(|w| !w.is_empty())
                        .collect()
                })
                .unwrap_or_else(|| default.iter().map(|w| w.to_string()).collect())
        };

        Self {
            backend: DashboardBackend::Http,
            session_url: derived(raw.session_url, "/api/auth/session"),
            credentials_url: derived(raw.credentials_url, "/api/auth/callback/credentials"),
            reset_url: derived(raw.reset_url, "/api/reset-points"),
            login_url: raw.login_url,
            dashboard_url: raw.dashboard_url,
            username: raw.username.trim().to_string(),
            password: Secret::new(raw.password.unwrap_or_default()),
            usage_selector: raw
                .usage_selector
                .unwrap_or_else(|| DEFAULT_USAGE_SELECTOR.to_string()),
            reset_button_keywords: words(raw.reset_button_keywords, DEFAULT_RESET_BUTTON_KEYWORDS),
            exhausted_markers: words(raw.exhausted_markers, DEFAULT_EXHAUSTED_MARKERS),
        }
    }

    /// `scheme://host[:port]` of the login page
    pub fn origin(&self) -> String {
        url_origin(&self.login_url).unwrap_or_default()
    }
}

/// SMTP authentication mechanism
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SmtpAuthMethod {
    #[default]
    Plain,
    Login,
}

/// Email alert settings
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub smtp: SmtpConfig,
}

/// SMTP relay settings
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    /// Implicit TLS when true, STARTTLS when false
    pub secure: bool,
    pub user: Option<String>,
    pub password: Option<Secret>,
    pub auth_method: SmtpAuthMethod,
}

impl EmailConfig {
    fn from_raw(raw: RawEmail) -> Self {
        let smtp = raw.smtp;
        let auth_method = match smtp.auth_method.as_deref().map(str::to_lowercase).as_deref() {
            Some("login") => SmtpAuthMethod::Login,
            _ => SmtpAuthMethod::Plain,
        };

        Self {
            from: raw.from.trim().to_string(),
            to: raw.to.to_vec().into_iter().map(|a| a.trim().to_string()).collect(),
            subject: raw
                .subject
                .unwrap_or_else(|| DEFAULT_EMAIL_SUBJECT.to_string()),
            smtp: SmtpConfig {
                port: smtp.port.unwrap_or(if smtp.secure { 465 } else { 587 }),
                host: smtp.host,
                secure: smtp.secure,
                user: smtp.user,
                password: smtp.password.map(Secret::new),
                auth_method,
            },
        }
    }
}

/// Process-level settings
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub lock_file: PathBuf,
}

impl ServiceConfig {
    fn from_raw(raw: RawServiceConfig) -> Self {
        Self {
            lock_file: raw.lock_file.unwrap_or_else(default_lock_path),
        }
    }
}

//! Configuration validation

use crate::schema::{RawConfig, RawDashboard, RawEmail, RawSchedule};
use refill_util::{ReferenceZone, WallClock};
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("[schedule] {field}: {message}")]
    ScheduleError { field: String, message: String },

    #[error("[dashboard] {field}: {message}")]
    DashboardError { field: String, message: String },

    #[error("[email] {field}: {message}")]
    EmailError { field: String, message: String },

    #[error("Invalid time format '{value}': {message}")]
    InvalidTimeFormat { value: String, message: String },

    #[error("Poll intervals must satisfy near <= mid <= far (near={near}ms, mid={mid}ms, far={far}ms)")]
    IntervalOrder { near: u64, mid: u64, far: u64 },
}

impl ValidationError {
    fn schedule(field: &str, message: impl Into<String>) -> Self {
        Self::ScheduleError {
            field: field.to_string(),
            message: message.into(),
        }
    }

    fn dashboard(field: &str, message: impl Into<String>) -> Self {
        Self::DashboardError {
            field: field.to_string(),
            message: message.into(),
        }
    }

    fn email(field: &str, message: impl Into<String>) -> Self {
        Self::EmailError {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Supported dashboard backends
pub const SUPPORTED_BACKENDS: &[&str] = &["http"];

/// Validate a raw configuration, collecting every problem
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    errors.extend(validate_schedule(&config.schedule));
    errors.extend(validate_dashboard(&config.dashboard));

    if let Some(email) = &config.email
        && email.enabled
    {
        errors.extend(validate_email(email));
    }

    errors
}

fn validate_schedule(schedule: &RawSchedule) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    for value in [&schedule.window_start, &schedule.window_end]
        .into_iter()
        .flatten()
    {
        if let Err(e) = value.parse::<WallClock>() {
            errors.push(ValidationError::InvalidTimeFormat {
                value: value.clone(),
                message: e.to_string(),
            });
        }
    }

    if let Some(tz) = &schedule.timezone
        && let Err(e) = tz.parse::<ReferenceZone>()
    {
        errors.push(ValidationError::schedule("timezone", e.to_string()));
    }

    let intervals = [
        ("poll_interval_far_ms", schedule.poll_interval_far_ms),
        ("poll_interval_mid_ms", schedule.poll_interval_mid_ms),
        ("poll_interval_near_ms", schedule.poll_interval_near_ms),
        ("retry_delay_ms", schedule.retry_delay_ms),
        ("call_timeout_ms", schedule.call_timeout_ms),
    ];
    for (field, value) in intervals {
        if value == Some(0) {
            errors.push(ValidationError::schedule(field, "must be greater than zero"));
        }
    }

    let near = schedule
        .poll_interval_near_ms
        .unwrap_or(crate::DEFAULT_POLL_INTERVAL_NEAR_MS);
    let mid = schedule
        .poll_interval_mid_ms
        .unwrap_or(crate::DEFAULT_POLL_INTERVAL_MID_MS);
    let far = schedule
        .poll_interval_far_ms
        .unwrap_or(crate::DEFAULT_POLL_INTERVAL_FAR_MS);
    if near > mid || mid > far {
        errors.push(ValidationError::IntervalOrder { near, mid, far });
    }

    errors
}

fn validate_dashboard(dashboard: &RawDashboard) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if !SUPPORTED_BACKENDS.contains(&dashboard.backend.to_lowercase().as_str()) {
        errors.push(ValidationError::dashboard(
            "backend",
            format!(
                "unsupported backend '{}' (supported: {})",
                dashboard.backend,
                SUPPORTED_BACKENDS.join(", ")
            ),
        ));
    }

    let urls = [
        ("login_url", Some(&dashboard.login_url)),
        ("dashboard_url", Some(&dashboard.dashboard_url)),
        ("session_url", dashboard.session_url.as_ref()),
        ("credentials_url", dashboard.credentials_url.as_ref()),
        ("reset_url", dashboard.reset_url.as_ref()),
    ];
    for (field, value) in urls {
        if let Some(url) = value
            && let Err(e) = check_http_url(url)
        {
            errors.push(ValidationError::dashboard(field, e));
        }
    }

    if dashboard.username.trim().is_empty() {
        errors.push(ValidationError::dashboard("username", "cannot be empty"));
    }

    match &dashboard.password {
        Some(p) if !p.is_empty() => {}
        _ => errors.push(ValidationError::dashboard(
            "password",
            "missing (set it in the file or via REFILL_DASHBOARD_PASSWORD)",
        )),
    }

    if let Some(selector) = &dashboard.usage_selector
        && selector.trim().is_empty()
    {
        errors.push(ValidationError::dashboard("usage_selector", "cannot be empty"));
    }

    if let Some(keywords) = &dashboard.reset_button_keywords
        && keywords.iter().all(|k| k.trim().is_empty())
    {
        errors.push(ValidationError::dashboard(
            "reset_button_keywords",
            "needs at least one non-empty keyword",
        ));
    }

    errors
}

fn validate_email(email: &RawEmail) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if !looks_like_address(&email.from) {
        errors.push(ValidationError::email("from", format!("'{}' is not an address", email.from)));
    }

    let recipients = email.to.to_vec();
    if recipients.is_empty() {
        errors.push(ValidationError::email("to", "needs at least one recipient"));
    }
    for addr in recipients.iter().filter(|a| !looks_like_address(a)) {
        errors.push(ValidationError::email("to", format!("'{}' is not an address", addr)));
    }

    if email.smtp.host.trim().is_empty() {
        errors.push(ValidationError::email("smtp.host", "cannot be empty"));
    }

    if let Some(method) = &email.smtp.auth_method
        && !matches!(method.to_lowercase().as_str(), "plain" | "login")
    {
        errors.push(ValidationError::email(
            "smtp.auth_method",
            format!("unknown method '{}' (expected plain or login)", method),
        ));
    }

    if email.smtp.user.is_some() && email.smtp.password.as_deref().is_none_or(str::is_empty) {
        errors.push(ValidationError::email(
            "smtp.password",
            "missing (set it in the file or via REFILL_SMTP_PASSWORD)",
        ));
    }

    errors
}

/// Parse HH:MM time format
pub fn parse_time(s: &str) -> Result<(u8, u8), String> {
    refill_util::parse_hh_mm(s)
}

fn check_http_url(url: &str) -> Result<(), String> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| format!("'{}' must start with http:// or https://", url))?;

    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if host.is_empty() {
        return Err(format!("'{}' has no host", url));
    }
    Ok(())
}

/// Origin (`scheme://host[:port]`) of an http(s) URL
pub fn url_origin(url: &str) -> Option<String> {
    let (scheme, rest) = url.split_once("://")?;
    let host = rest.split(['/', '?', '#']).next()?;
    if host.is_empty() {
        return None;
    }
    Some(format!("{}://{}", scheme, host))
}

fn looks_like_address(addr: &str) -> bool {
    let addr = addr.trim();
    // "Name <user@host>" is accepted too
    let bare = match (addr.find('<'), addr.rfind('>')) {
        (Some(open), Some(close)) if open < close => &addr[open + 1..close],
        _ => addr,
    };
    match bare.split_once('@') {
        Some((user, host)) => !user.is_empty() && host.contains('.'),
        None => false,
    }
}

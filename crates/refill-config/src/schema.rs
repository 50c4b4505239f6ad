//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// When to reset and how often to look
    #[serde(default)]
    pub schedule: RawSchedule,

    /// The dashboard to watch
    pub dashboard: RawDashboard,

    /// Failure alerts by email
    #[serde(default)]
    pub email: Option<RawEmail>,

    /// Process-level settings
    #[serde(default)]
    pub service: RawServiceConfig,
}

/// Reset policy and polling cadence
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawSchedule {
    /// Reset when the counter drops below this (default: 500)
    pub threshold: Option<u64>,

    /// Daily reset window start, HH:MM (default: 23:58)
    pub window_start: Option<String>,

    /// Daily reset window end, HH:MM inclusive (default: 23:59)
    pub window_end: Option<String>,

    /// "local", "utc" or a fixed offset such as "+08:00" (default: local)
    pub timezone: Option<String>,

    /// Longest sleep between checks when the window is far away
    pub poll_interval_far_ms: Option<u64>,

    /// Sleep between checks within 30 minutes of the window
    pub poll_interval_mid_ms: Option<u64>,

    /// Sleep between checks within 5 minutes of the window
    pub poll_interval_near_ms: Option<u64>,

    /// Fallback sleep after a failed iteration
    pub retry_delay_ms: Option<u64>,

    /// Upper bound for every dashboard and alert call
    pub call_timeout_ms: Option<u64>,
}

/// Dashboard connection and markup hints
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawDashboard {
    /// Automation backend (only "http" is supported)
    #[serde(default = "default_backend")]
    pub backend: String,

    pub login_url: String,
    pub dashboard_url: String,

    /// Session probe endpoint (default: <origin>/api/auth/session)
    pub session_url: Option<String>,

    /// Credentials callback endpoint (default: <origin>/api/auth/callback/credentials)
    pub credentials_url: Option<String>,

    /// Reset endpoint (default: <origin>/api/reset-points)
    pub reset_url: Option<String>,

    pub username: String,

    /// May be omitted when REFILL_DASHBOARD_PASSWORD is set
    pub password: Option<String>,

    /// CSS selector of the element showing "current / ceiling"
    pub usage_selector: Option<String>,

    /// Words that identify the reset button
    pub reset_button_keywords: Option<Vec<String>>,

    /// Words on the reset button meaning today's reset is spent
    pub exhausted_markers: Option<Vec<String>>,
}

fn default_backend() -> String {
    "http".to_string()
}

/// Email alert settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawEmail {
    #[serde(default = "default_true")]
    pub enabled: bool,

    pub from: String,

    pub to: RawRecipients,

    /// Subject prefix (default: "refilld alert")
    pub subject: Option<String>,

    pub smtp: RawSmtp,
}

fn default_true() -> bool {
    true
}

/// One address or a list
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RawRecipients {
    One(String),
    Many(Vec<String>),
}

impl RawRecipients {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::One(addr) => vec![addr.clone()],
            Self::Many(list) => list.clone(),
        }
    }
}

/// SMTP relay
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawSmtp {
    pub host: String,

    /// Default: 465 when secure, 587 otherwise
    pub port: Option<u16>,

    /// Implicit TLS when true, STARTTLS when false
    #[serde(default = "default_true")]
    pub secure: bool,

    pub user: Option<String>,

    /// May be omitted when REFILL_SMTP_PASSWORD is set
    pub password: Option<String>,

    /// "plain" or "login" (default: plain)
    pub auth_method: Option<String>,
}

/// Process-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// Single-instance lock file
    pub lock_file: Option<PathBuf>,
}

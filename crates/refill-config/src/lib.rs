//! Configuration parsing and validation for refilld
//!
//! Supports TOML configuration with:
//! - Versioned schema
//! - Reset threshold, daily window and polling cadence
//! - Dashboard endpoints and credentials
//! - Optional email alerts
//! - Validation with clear error messages

mod schema;
mod settings;
mod validation;

pub use schema::*;
pub use settings::*;
pub use validation::*;

use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<ValidationError> },

    #[error("Unsupported config version: {0}")]
    UnsupportedVersion(u32),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Load and validate configuration from a TOML file, applying environment overrides
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<Settings> {
    let content = std::fs::read_to_string(path)?;
    parse_config_with(&content, &EnvOverrides::from_env())
}

/// Parse and validate configuration from a TOML string
pub fn parse_config(content: &str) -> ConfigResult<Settings> {
    parse_config_with(content, &EnvOverrides::default())
}

/// Parse and validate configuration, applying the given overrides before validation
pub fn parse_config_with(content: &str, overrides: &EnvOverrides) -> ConfigResult<Settings> {
    let mut raw: RawConfig = toml::from_str(content)?;

    // Check version
    if raw.config_version != CURRENT_CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion(raw.config_version));
    }

    overrides.apply(&mut raw);

    // Validate
    let errors = validate_config(&raw);
    if !errors.is_empty() {
        return Err(ConfigError::ValidationFailed { errors });
    }

    tracing::debug!(
        threshold = raw.schedule.threshold.unwrap_or(DEFAULT_THRESHOLD),
        email = raw.email.as_ref().is_some_and(|e| e.enabled),
        "Configuration validated"
    );

    Ok(Settings::from_raw(raw))
}

/// Current supported config version
pub const CURRENT_CONFIG_VERSION: u32 = 1;

//! Error types for refilld utilities

use thiserror::Error;

/// Error type shared by the utility layer
#[derive(Debug, Error)]
pub enum RefillError {
    #[error("Invalid time '{value}': {message}")]
    InvalidTime { value: String, message: String },

    #[error("Invalid timezone '{0}': expected \"local\", \"utc\" or an offset like \"+08:00\"")]
    InvalidTimezone(String),

    #[error("Instance lock error: {0}")]
    Lock(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RefillError {
    pub fn invalid_time(value: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidTime {
            value: value.into(),
            message: message.into(),
        }
    }

    pub fn lock(msg: impl Into<String>) -> Self {
        Self::Lock(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, RefillError>;

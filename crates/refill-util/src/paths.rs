//! Default paths for refilld components
//!
//! Paths are user-writable by default (no root required):
//! - Config: `$XDG_CONFIG_HOME/refill/config.toml` or `~/.config/refill/config.toml`
//! - Lock: `$XDG_RUNTIME_DIR/refilld/refilld.lock` or `/tmp/refilld-$USER/refilld.lock`

use std::path::PathBuf;

/// Environment variable for overriding the config file path
pub const REFILL_CONFIG_ENV: &str = "REFILL_CONFIG";

/// Environment variable for overriding the lock file path
pub const REFILL_LOCK_ENV: &str = "REFILL_LOCK";

/// Lock filename within the runtime directory
const LOCK_FILENAME: &str = "refilld.lock";

/// Config filename within the config directory
const CONFIG_FILENAME: &str = "config.toml";

/// Application subdirectory names
const CONFIG_APP_DIR: &str = "refill";
const RUNTIME_APP_DIR: &str = "refilld";

/// Get the default config file path.
///
/// Order of precedence:
/// 1. `$REFILL_CONFIG` environment variable (if set)
/// 2. `$XDG_CONFIG_HOME/refill/config.toml` (if XDG_CONFIG_HOME is set)
/// 3. `~/.config/refill/config.toml` (fallback)
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(REFILL_CONFIG_ENV) {
        return PathBuf::from(path);
    }

    config_path_without_env()
}

/// Get the config path without checking the REFILL_CONFIG env var.
pub fn config_path_without_env() -> PathBuf {
    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home)
            .join(CONFIG_APP_DIR)
            .join(CONFIG_FILENAME);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(CONFIG_APP_DIR)
            .join(CONFIG_FILENAME);
    }

    PathBuf::from("/etc").join(CONFIG_APP_DIR).join(CONFIG_FILENAME)
}

/// Get the default lock file path.
///
/// Order of precedence:
/// 1. `$REFILL_LOCK` environment variable (if set)
/// 2. `$XDG_RUNTIME_DIR/refilld/refilld.lock` (if XDG_RUNTIME_DIR is set)
/// 3. `/tmp/refilld-$USER/refilld.lock` (fallback)
pub fn default_lock_path() -> PathBuf {
    if let Ok(path) = std::env::var(REFILL_LOCK_ENV) {
        return PathBuf::from(path);
    }

    lock_path_without_env()
}

/// Get the lock path without checking the REFILL_LOCK env var.
/// Used for default values in configs where the env var is checked separately.
pub fn lock_path_without_env() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir)
            .join(RUNTIME_APP_DIR)
            .join(LOCK_FILENAME);
    }

    let username = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    PathBuf::from(format!("/tmp/{}-{}", RUNTIME_APP_DIR, username)).join(LOCK_FILENAME)
}

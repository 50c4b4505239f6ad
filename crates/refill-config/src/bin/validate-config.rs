//! Config validation CLI tool
//!
//! Validates a refilld configuration file and reports any errors.

use refill_config::{ConfigError, CURRENT_CONFIG_VERSION, SmtpAuthMethod};
use refill_util::{default_config_path, format_duration};
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a refilld configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            eprintln!();
            eprintln!("Example:");
            eprintln!("  validate-config {}", default_path.display());
            eprintln!("  validate-config config.example.toml");
            return ExitCode::from(2);
        }
    };

    // Check file exists
    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    // Try to load and validate
    match refill_config::load_config(&config_path) {
        Ok(settings) => {
            let schedule = &settings.schedule;
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", CURRENT_CONFIG_VERSION);
            println!("  Threshold: {}", schedule.threshold);
            println!("  Reset window: {} ({})", schedule.window, schedule.timezone);
            println!(
                "  Polling: far {}, mid {}, near {}",
                format_duration(schedule.poll_interval_far),
                format_duration(schedule.poll_interval_mid),
                format_duration(schedule.poll_interval_near)
            );
            println!(
                "  Retry delay: {}, call timeout: {}",
                format_duration(schedule.retry_delay),
                format_duration(schedule.call_timeout)
            );

            println!();
            println!("Dashboard ({}):", settings.dashboard.backend);
            println!("  Login:     {}", settings.dashboard.login_url);
            println!("  Dashboard: {}", settings.dashboard.dashboard_url);
            println!("  Reset:     {}", settings.dashboard.reset_url);
            println!("  User:      {}", settings.dashboard.username);

            println!();
            match &settings.email {
                Some(email) => {
                    let auth = match email.smtp.auth_method {
                        SmtpAuthMethod::Plain => "plain",
                        SmtpAuthMethod::Login => "login",
                    };
                    println!("Email alerts:");
                    println!(
                        "  Relay: {}:{} ({}, auth {})",
                        email.smtp.host,
                        email.smtp.port,
                        if email.smtp.secure { "tls" } else { "starttls" },
                        auth
                    );
                    println!("  From:  {}", email.from);
                    println!("  To:    {}", email.to.join(", "));
                }
                None => println!("Email alerts: disabled (failures are only logged)"),
            }

            println!();
            println!("Lock file: {}", settings.service.lock_file.display());

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver, CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}

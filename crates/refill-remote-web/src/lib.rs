//! Network capabilities for refilld
//!
//! Provides:
//! - The HTTP dashboard client (NextAuth login, cookie replay, HTML scraping)
//! - Markup heuristics for the usage counter and the reset button
//! - SMTP and log-only alerters

mod dashboard;
mod email;
mod page;

pub use dashboard::*;
pub use email::*;
pub use page::*;

use refill_config::{DashboardBackend, DashboardConfig, EmailConfig};
use refill_remote_api::{Alerter, DashboardClient, RemoteResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Build the dashboard client selected by `[dashboard] backend`
pub fn build_dashboard(
    config: &DashboardConfig,
    call_timeout: Duration,
) -> RemoteResult<Arc<dyn DashboardClient>> {
    match config.backend {
        DashboardBackend::Http => {
            info!(url = %config.dashboard_url, "Using HTTP dashboard client");
            Ok(Arc::new(HttpDashboard::new(config.clone(), call_timeout)?))
        }
    }
}

/// Build the alerter: SMTP when email is configured, log-only otherwise
pub fn build_alerter(
    email: Option<&EmailConfig>,
    call_timeout: Duration,
) -> RemoteResult<Arc<dyn Alerter>> {
    match email {
        Some(config) => {
            info!(
                relay = %config.smtp.host,
                port = config.smtp.port,
                recipients = config.to.len(),
                "Email alerts enabled"
            );
            Ok(Arc::new(SmtpAlerter::new(config.clone(), call_timeout)?))
        }
        None => {
            info!("Email alerts disabled, failures will only be logged");
            Ok(Arc::new(LogAlerter))
        }
    }
}

//! Capability traits

use async_trait::async_trait;
use refill_api::{ResetAck, UsageSnapshot};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors from dashboard and alerter operations
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Could not parse dashboard page: {0}")]
    Parse(String),

    #[error("Reset rejected: {0}")]
    ResetRejected(String),

    #[error("Alert delivery failed: {0}")]
    Delivery(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RemoteError {
    /// Whether a fresh login might fix this
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// The web dashboard holding the usage counter
#[async_trait]
pub trait DashboardClient: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str {
        "dashboard"
    }

    /// Read the current usage counter
    async fn fetch_usage(&self) -> RemoteResult<UsageSnapshot>;

    /// Trigger the reset control.
    ///
    /// Returns [`ResetAck::AlreadyUsed`] without touching remote state when
    /// today's reset has already been spent.
    async fn attempt_reset(&self) -> RemoteResult<ResetAck>;
}

/// Delivers failure notifications
#[async_trait]
pub trait Alerter: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    async fn notify(&self, subject: &str, body: &str) -> RemoteResult<()>;
}

#[async_trait]
impl<T: DashboardClient + ?Sized> DashboardClient for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn fetch_usage(&self) -> RemoteResult<UsageSnapshot> {
        (**self).fetch_usage().await
    }

    async fn attempt_reset(&self) -> RemoteResult<ResetAck> {
        (**self).attempt_reset().await
    }
}

#[async_trait]
impl<T: Alerter + ?Sized> Alerter for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn notify(&self, subject: &str, body: &str) -> RemoteResult<()> {
        (**self).notify(subject, body).await
    }
}

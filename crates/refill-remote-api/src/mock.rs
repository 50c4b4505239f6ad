//! Mock dashboard and alerter for testing

use async_trait::async_trait;
use refill_api::{ResetAck, UsageSnapshot};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{Alerter, DashboardClient, RemoteError, RemoteResult};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One scripted answer to `fetch_usage`
#[derive(Debug, Clone)]
pub enum MockFetch {
    /// Report this counter (and remember it as the new steady state)
    Usage { current: u64, ceiling: u64 },
    /// Fail with a network error
    Fail(String),
    /// Never answer
    Hang,
}

/// Mock dashboard for unit/integration testing.
///
/// Scripted fetch answers are consumed first; afterwards the steady-state
/// counter is reported. A performed reset refills the counter to its ceiling
/// and spends one of the day's resets; once none are left, further attempts
/// answer [`ResetAck::AlreadyUsed`] like the real dashboard.
pub struct MockDashboard {
    usage: Arc<Mutex<(u64, u64)>>,
    fetch_script: Arc<Mutex<VecDeque<MockFetch>>>,
    resets_remaining: Arc<Mutex<u32>>,
    fetch_calls: AtomicU64,
    reset_calls: AtomicU64,
    performed_resets: AtomicU64,

    /// Configure fetch to fail
    pub fail_fetch: Arc<Mutex<bool>>,

    /// Configure fetch to never complete
    pub hang_fetch: Arc<Mutex<bool>>,

    /// Configure reset to be rejected
    pub fail_reset: Arc<Mutex<bool>>,

    /// Configure reset to never complete
    pub hang_reset: Arc<Mutex<bool>>,
}

impl MockDashboard {
    pub fn new(current: u64, ceiling: u64) -> Self {
        Self {
            usage: Arc::new(Mutex::new((current, ceiling))),
            fetch_script: Arc::new(Mutex::new(VecDeque::new())),
            resets_remaining: Arc::new(Mutex::new(1)),
            fetch_calls: AtomicU64::new(0),
            reset_calls: AtomicU64::new(0),
            performed_resets: AtomicU64::new(0),
            fail_fetch: Arc::new(Mutex::new(false)),
            hang_fetch: Arc::new(Mutex::new(false)),
            fail_reset: Arc::new(Mutex::new(false)),
            hang_reset: Arc::new(Mutex::new(false)),
        }
    }

    /// Queue answers for the next fetches
    pub fn with_script(self, script: impl IntoIterator<Item = MockFetch>) -> Self {
        lock(&self.fetch_script).extend(script);
        self
    }

    pub fn set_usage(&self, current: u64, ceiling: u64) {
        *lock(&self.usage) = (current, ceiling);
    }

    pub fn usage(&self) -> (u64, u64) {
        *lock(&self.usage)
    }

    /// How many resets the remote still allows today
    pub fn set_resets_remaining(&self, remaining: u32) {
        *lock(&self.resets_remaining) = remaining;
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        *lock(&self.fail_fetch) = fail;
    }

    pub fn set_hang_fetch(&self, hang: bool) {
        *lock(&self.hang_fetch) = hang;
    }

    pub fn set_fail_reset(&self, fail: bool) {
        *lock(&self.fail_reset) = fail;
    }

    pub fn set_hang_reset(&self, hang: bool) {
        *lock(&self.hang_reset) = hang;
    }

    pub fn fetch_count(&self) -> u64 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Every `attempt_reset` call, whatever its result
    pub fn reset_count(&self) -> u64 {
        self.reset_calls.load(Ordering::SeqCst)
    }

    /// Resets that actually changed remote state
    pub fn performed_count(&self) -> u64 {
        self.performed_resets.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> UsageSnapshot {
        let (current, ceiling) = self.usage();
        UsageSnapshot::new(current, ceiling, refill_util::now().fixed_offset())
    }
}

impl Default for MockDashboard {
    fn default() -> Self {
        Self::new(20_000, 20_000)
    }
}

#[async_trait]
impl DashboardClient for MockDashboard {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_usage(&self) -> RemoteResult<UsageSnapshot> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        let scripted = lock(&self.fetch_script).pop_front();
        match scripted {
            Some(MockFetch::Usage { current, ceiling }) => self.set_usage(current, ceiling),
            Some(MockFetch::Fail(detail)) => return Err(RemoteError::Network(detail)),
            Some(MockFetch::Hang) => std::future::pending::<()>().await,
            None => {}
        }

        if *lock(&self.hang_fetch) {
            std::future::pending::<()>().await;
        }
        if *lock(&self.fail_fetch) {
            return Err(RemoteError::Network("Mock fetch failure".into()));
        }

        Ok(self.snapshot())
    }

    async fn attempt_reset(&self) -> RemoteResult<ResetAck> {
        self.reset_calls.fetch_add(1, Ordering::SeqCst);

        if *lock(&self.hang_reset) {
            std::future::pending::<()>().await;
        }
        if *lock(&self.fail_reset) {
            return Err(RemoteError::ResetRejected("Mock reset failure".into()));
        }

        let mut remaining = lock(&self.resets_remaining);
        if *remaining == 0 {
            return Ok(ResetAck::AlreadyUsed);
        }
        *remaining -= 1;
        drop(remaining);

        let mut usage = lock(&self.usage);
        usage.0 = usage.1;
        self.performed_resets.fetch_add(1, Ordering::SeqCst);
        Ok(ResetAck::Performed)
    }
}

/// A notification the mock alerter accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentAlert {
    pub subject: String,
    pub body: String,
}

/// Mock alerter recording every delivered notification
pub struct MockAlerter {
    sent: Arc<Mutex<Vec<SentAlert>>>,
    attempts: AtomicU64,

    /// Configure delivery to fail
    pub fail: Arc<Mutex<bool>>,

    /// Configure delivery to never complete
    pub hang: Arc<Mutex<bool>>,
}

impl MockAlerter {
    pub fn new() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            attempts: AtomicU64::new(0),
            fail: Arc::new(Mutex::new(false)),
            hang: Arc::new(Mutex::new(false)),
        }
    }

    pub fn set_fail(&self, fail: bool) {
        *lock(&self.fail) = fail;
    }

    pub fn set_hang(&self, hang: bool) {
        *lock(&self.hang) = hang;
    }

    /// Notifications delivered so far
    pub fn sent(&self) -> Vec<SentAlert> {
        lock(&self.sent).clone()
    }

    /// Delivery attempts, including failed ones
    pub fn attempt_count(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Default for MockAlerter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Alerter for MockAlerter {
    fn name(&self) -> &str {
        "mock"
    }

    async fn notify(&self, subject: &str, body: &str) -> RemoteResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if *lock(&self.hang) {
            std::future::pending::<()>().await;
        }
        if *lock(&self.fail) {
            return Err(RemoteError::Delivery("Mock delivery failure".into()));
        }

        lock(&self.sent).push(SentAlert {
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

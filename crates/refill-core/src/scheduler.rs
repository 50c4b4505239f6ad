//! The schedule loop: fetch, decide, reset, alert, sleep

use chrono::{DateTime, FixedOffset};
use futures::FutureExt;
use refill_api::{
    AttemptOutcome, FailureKind, IterationFailure, IterationReport, ResetAck, UsageSnapshot,
};
use refill_config::ScheduleConfig;
use refill_remote_api::{Alerter, DashboardClient, RemoteError, RemoteResult};
use refill_util::{format_datetime_full, format_duration};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::{Cadence, Clock, LoopEvent, LoopPhase, ResetPolicy, ScheduleState, SystemClock};

/// Orchestrates one dashboard: polls it, applies the reset policy, triggers
/// resets and reports failures. One sequential task; nothing runs in parallel.
pub struct ScheduleLoop {
    policy: ResetPolicy,
    cadence: Cadence,
    call_timeout: Duration,
    dashboard: Arc<dyn DashboardClient>,
    alerter: Arc<dyn Alerter>,
    clock: Arc<dyn Clock>,
    state: ScheduleState,
    event_tx: Option<mpsc::UnboundedSender<LoopEvent>>,
}

impl ScheduleLoop {
    pub fn new(
        schedule: &ScheduleConfig,
        dashboard: Arc<dyn DashboardClient>,
        alerter: Arc<dyn Alerter>,
    ) -> Self {
        info!(
            threshold = schedule.threshold,
            window = %schedule.window,
            timezone = %schedule.timezone,
            dashboard = dashboard.name(),
            alerter = alerter.name(),
            "Schedule loop initialized"
        );

        Self {
            policy: ResetPolicy::from_schedule(schedule),
            cadence: Cadence::from_schedule(schedule),
            call_timeout: schedule.call_timeout,
            dashboard,
            alerter,
            clock: Arc::new(SystemClock::new(schedule.timezone)),
            state: ScheduleState::new(),
            event_tx: None,
        }
    }

    /// Replace the wall clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Receive a [`LoopEvent`] for every iteration and sleep
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<LoopEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.event_tx = Some(tx);
        rx
    }

    pub fn state(&self) -> &ScheduleState {
        &self.state
    }

    pub fn policy(&self) -> &ResetPolicy {
        &self.policy
    }

    /// Run until `shutdown` completes. A shutdown during an iteration drops
    /// the iteration at its current await point; it is not replayed.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let sleep = tokio::select! {
                _ = &mut shutdown => break,
                (_, sleep) = self.step() => sleep,
            };

            tokio::select! {
                _ = &mut shutdown => break,
                _ = self.sleep_for(sleep) => {}
            }
            self.state.enter(LoopPhase::Idle);
        }

        info!(iterations = self.state.iterations, "Schedule loop stopped");
        self.emit(LoopEvent::Stopped);
    }

    /// One iteration plus the sleep that should follow it.
    ///
    /// A panic inside the iteration (a capability bug, a scraper edge case)
    /// is contained here and reported like any other failure.
    pub async fn step(&mut self) -> (IterationReport, Duration) {
        let outcome = AssertUnwindSafe(self.run_iteration()).catch_unwind().await;
        let report = match outcome {
            Ok(report) => report,
            Err(panic) => self.recover_from_panic(panic).await,
        };
        let now = self.clock.now();
        let sleep = self.plan_sleep(&report, &now);

        let wake_at = add_std(now, sleep);
        self.state.next_wake = Some(wake_at);
        self.state.enter(LoopPhase::Sleeping);

        info!(
            sleep = %format_duration(sleep),
            wake_at = %format_datetime_full(&wake_at),
            "Next check scheduled"
        );
        self.emit(LoopEvent::IterationCompleted(report.clone()));
        self.emit(LoopEvent::Sleeping {
            duration: sleep,
            wake_at,
        });

        (report, sleep)
    }

    /// Fetch, decide, reset if due, alert on failure
    pub async fn run_iteration(&mut self) -> IterationReport {
        let now = self.clock.now();
        self.state.iterations += 1;
        self.state.last_evaluation = Some(now);
        self.state.enter(LoopPhase::Fetching);

        let mut report = IterationReport::new(now);

        match self.call(self.dashboard.fetch_usage()).await {
            Ok(snapshot) => {
                self.state.last_snapshot = Some(snapshot);
                report.snapshot = Some(snapshot);

                self.state.enter(LoopPhase::Deciding);
                let decision = self.policy.decide(&snapshot, &now);
                report.decision = Some(decision);

                info!(
                    current = snapshot.current,
                    ceiling = snapshot.ceiling,
                    percentage = snapshot.percentage(),
                    should_reset = decision.should_reset,
                    reason = %decision.reason,
                    "Usage evaluated"
                );

                if decision.should_reset {
                    let outcome = self.attempt_reset(Some(snapshot)).await;
                    if let Some(detail) = outcome.error_detail.clone().filter(|_| !outcome.succeeded) {
                        report.failure = Some(IterationFailure::new(FailureKind::Reset, detail));
                    }
                    report.attempt = Some(outcome);
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to read usage");
                report.failure = Some(IterationFailure::new(FailureKind::Fetch, e.to_string()));
            }
        }

        self.finish(&mut report).await;
        report
    }

    /// Fetch and decide only. Nothing is reset and nobody is alerted.
    pub async fn evaluate(&mut self) -> IterationReport {
        let now = self.clock.now();
        self.state.last_evaluation = Some(now);
        let mut report = IterationReport::new(now);

        match self.call(self.dashboard.fetch_usage()).await {
            Ok(snapshot) => {
                self.state.last_snapshot = Some(snapshot);
                report.snapshot = Some(snapshot);
                report.decision = Some(self.policy.decide(&snapshot, &now));
            }
            Err(e) => {
                report.failure = Some(IterationFailure::new(FailureKind::Fetch, e.to_string()));
            }
        }
        report
    }

    /// Reset now regardless of the policy
    pub async fn force_reset(&mut self) -> IterationReport {
        let now = self.clock.now();
        self.state.iterations += 1;
        self.state.last_evaluation = Some(now);
        self.state.enter(LoopPhase::Fetching);

        let mut report = IterationReport::new(now);

        let before = match self.call(self.dashboard.fetch_usage()).await {
            Ok(snapshot) => {
                self.state.last_snapshot = Some(snapshot);
                report.snapshot = Some(snapshot);
                Some(snapshot)
            }
            Err(e) => {
                warn!(error = %e, "Could not read usage before forced reset");
                None
            }
        };

        info!("Forcing a reset, policy bypassed");
        let outcome = self.attempt_reset(before).await;
        if !outcome.succeeded {
            let detail = outcome.error_detail.clone().unwrap_or_default();
            report.failure = Some(IterationFailure::new(FailureKind::Reset, detail));
        }
        report.attempt = Some(outcome);

        self.finish(&mut report).await;
        report
    }

    /// How long to sleep after `report`, judged at `now`
    pub fn plan_sleep(&self, report: &IterationReport, now: &DateTime<FixedOffset>) -> Duration {
        if report.is_failure() {
            return self.cadence.backoff(self.state.consecutive_failures.max(1), now);
        }

        let reset_in_window = report
            .attempt
            .as_ref()
            .is_some_and(|attempt| attempt.succeeded)
            && self.policy.window.contains(&report.started_at);
        if reset_in_window {
            return self.cadence.after_window_attempt(now);
        }

        self.cadence.next_poll(now)
    }

    async fn attempt_reset(&mut self, before: Option<UsageSnapshot>) -> AttemptOutcome {
        self.state.enter(LoopPhase::Resetting);

        match self.call(self.dashboard.attempt_reset()).await {
            Ok(ResetAck::Performed) => {
                let after = match self.call(self.dashboard.fetch_usage()).await {
                    Ok(snapshot) => {
                        self.state.last_snapshot = Some(snapshot);
                        Some(snapshot)
                    }
                    Err(e) => {
                        debug!(error = %e, "Could not read usage after reset");
                        None
                    }
                };
                info!(
                    before = ?before.map(|s| s.current),
                    after = ?after.map(|s| s.current),
                    "Reset performed"
                );
                AttemptOutcome::from_ack(ResetAck::Performed, before, after)
            }
            Ok(ResetAck::AlreadyUsed) => {
                info!("Reset already used today, nothing to do");
                AttemptOutcome::from_ack(ResetAck::AlreadyUsed, before, None)
            }
            Err(e) => {
                error!(error = %e, "Reset attempt failed");
                AttemptOutcome::failed(before, e.to_string())
            }
        }
    }

    /// Turn a panicked iteration into a failure report and alert on it
    async fn recover_from_panic(&mut self, panic: Box<dyn Any + Send>) -> IterationReport {
        let detail = panic_detail(panic.as_ref());
        let kind = match self.state.phase {
            LoopPhase::Resetting => FailureKind::Reset,
            _ => FailureKind::Fetch,
        };
        error!(phase = %self.state.phase, detail = %detail, "Iteration panicked");

        let started_at = self.state.last_evaluation.unwrap_or_else(|| self.clock.now());
        let mut report = IterationReport::new(started_at);
        report.failure = Some(IterationFailure::new(
            kind,
            format!("internal error: {}", detail),
        ));

        let alerted = AssertUnwindSafe(self.finish(&mut report)).catch_unwind().await;
        if alerted.is_err() {
            error!("Failure handling panicked as well, alert skipped");
        }
        report
    }

    /// Update failure bookkeeping and alert if the iteration failed
    async fn finish(&mut self, report: &mut IterationReport) {
        let Some(failure) = report.failure.clone() else {
            self.state.record_success();
            return;
        };

        let consecutive = self.state.record_failure();
        self.state.enter(LoopPhase::Alerting);

        let last_known = report
            .last_known_snapshot()
            .copied()
            .or(self.state.last_snapshot);
        let subject = failure.kind.to_string();
        let body = alert_body(report.started_at, &failure, last_known.as_ref(), consecutive);

        match self.call(self.alerter.notify(&subject, &body)).await {
            Ok(()) => {
                report.alerted = true;
                info!(kind = %failure.kind, consecutive, "Failure alert sent");
            }
            Err(e) => {
                // Never re-alerted
                warn!(
                    kind = %FailureKind::Alert,
                    alerter = self.alerter.name(),
                    error = %e,
                    "Failed to deliver alert"
                );
            }
        }
    }

    /// Bound a capability call by the configured timeout
    async fn call<T, F>(&self, fut: F) -> RemoteResult<T>
    where
        F: Future<Output = RemoteResult<T>>,
    {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(self.call_timeout)),
        }
    }

    /// Sleep for `duration`, in chunks no longer than the far interval.
    ///
    /// Ends when either the monotonic or the wall-clock deadline passes, so
    /// a suspended host or a clock jump cannot stretch the sleep.
    async fn sleep_for(&self, duration: Duration) {
        let mono_deadline = Instant::now() + duration;
        let wall_deadline = add_std(self.clock.now(), duration);
        let chunk = self.cadence.far.max(Duration::from_secs(1));

        loop {
            let mono_left = mono_deadline.saturating_duration_since(Instant::now());
            let wall_left = (wall_deadline - self.clock.now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            let left = mono_left.min(wall_left);
            if left.is_zero() {
                break;
            }
            tokio::time::sleep(left.min(chunk)).await;
        }
    }

    fn emit(&self, event: LoopEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }
}

fn add_std(at: DateTime<FixedOffset>, by: Duration) -> DateTime<FixedOffset> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|by| at.checked_add_signed(by))
        .unwrap_or(DateTime::<chrono::Utc>::MAX_UTC.fixed_offset())
}

fn panic_detail(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}

/// Body of a failure notification
pub fn alert_body(
    at: DateTime<FixedOffset>,
    failure: &IterationFailure,
    last_known: Option<&UsageSnapshot>,
    consecutive_failures: u32,
) -> String {
    let usage = match last_known {
        Some(snapshot) => format!(
            "{} (observed {})",
            snapshot,
            format_datetime_full(&snapshot.observed_at)
        ),
        None => "unknown".to_string(),
    };

    format!(
        "Time: {}\nFailure: {}\nDetail: {}\nLast known usage: {}\nConsecutive failures: {}\n",
        format_datetime_full(&at),
        failure.kind,
        failure.detail,
        usage,
        consecutive_failures
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;
    use chrono::TimeZone;
    use refill_api::ResetReason;
    use refill_remote_api::{MockAlerter, MockDashboard, MockFetch};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn beijing(hour: u32, minute: u32, second: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 12, 25, hour, minute, second)
            .unwrap()
    }

    struct Harness {
        dashboard: Arc<MockDashboard>,
        alerter: Arc<MockAlerter>,
        clock: Arc<ManualClock>,
        schedule: ScheduleLoop,
    }

    fn harness(current: u64, now: DateTime<FixedOffset>) -> Harness {
        let dashboard = Arc::new(MockDashboard::new(current, 20_000));
        let alerter = Arc::new(MockAlerter::new());
        let clock = Arc::new(ManualClock::new(now));
        let schedule = ScheduleLoop::new(
            &ScheduleConfig::default(),
            dashboard.clone(),
            alerter.clone(),
        )
        .with_clock(clock.clone());

        Harness {
            dashboard,
            alerter,
            clock,
            schedule,
        }
    }

    #[tokio::test]
    async fn scenario_a_no_reset() {
        let mut h = harness(18_881, beijing(14, 0, 0));
        let (report, sleep) = h.schedule.step().await;

        assert_eq!(report.decision.unwrap().reason, ResetReason::NoneMatched);
        assert!(report.attempt.is_none());
        assert!(!report.is_failure());
        assert_eq!(h.dashboard.reset_count(), 0);
        assert!(h.alerter.sent().is_empty());
        assert_eq!(sleep, Duration::from_secs(30 * 60));
    }

    #[tokio::test]
    async fn scenario_b_below_threshold_resets() {
        let mut h = harness(300, beijing(14, 0, 0));
        let (report, sleep) = h.schedule.step().await;

        assert_eq!(report.decision.unwrap().reason, ResetReason::BelowThreshold);
        let attempt = report.attempt.unwrap();
        assert!(attempt.succeeded);
        assert_eq!(attempt.snapshot_before.unwrap().current, 300);
        assert_eq!(attempt.snapshot_after.unwrap().current, 20_000);
        assert_eq!(h.dashboard.performed_count(), 1);
        // Outside the window: normal cadence resumes
        assert_eq!(sleep, Duration::from_secs(30 * 60));
    }

    #[tokio::test]
    async fn scenario_c_window_resets_then_sleeps_until_tomorrow() {
        let mut h = harness(18_881, beijing(23, 58, 0));
        let (report, sleep) = h.schedule.step().await;

        assert_eq!(report.decision.unwrap().reason, ResetReason::InTimeWindow);
        assert!(report.attempt.unwrap().succeeded);
        assert_eq!(h.dashboard.performed_count(), 1);
        assert_eq!(sleep, Duration::from_secs(24 * 3600 - 5 * 60));
        assert_eq!(
            h.schedule.state().next_wake,
            Some(beijing(23, 58, 0) + chrono::Duration::seconds(24 * 3600 - 5 * 60))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_d_fetch_timeout() {
        let mut h = harness(18_881, beijing(14, 0, 0));
        h.dashboard.set_hang_fetch(true);

        let (report, sleep) = h.schedule.step().await;

        let failure = report.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::Fetch);
        assert!(failure.detail.contains("Timed out"));
        assert!(report.decision.is_none());
        assert!(report.alerted);
        assert_eq!(h.dashboard.reset_count(), 0);

        let sent = h.alerter.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "FetchFailure");
        assert!(sent[0].body.contains("Consecutive failures: 1"));
        assert_eq!(sleep, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn idempotent_when_already_used() {
        let mut h = harness(18_881, beijing(23, 58, 0));
        h.dashboard.set_resets_remaining(0);

        let first = h.schedule.run_iteration().await;
        h.clock.set(beijing(23, 58, 40));
        let second = h.schedule.run_iteration().await;

        for report in [first, second] {
            assert!(!report.is_failure());
            let attempt = report.attempt.as_ref().unwrap();
            assert!(attempt.succeeded);
            assert!(attempt.already_used);
        }
        assert_eq!(h.dashboard.performed_count(), 0);
        assert!(h.alerter.sent().is_empty());
    }

    #[tokio::test]
    async fn reset_failure_is_alerted_with_last_snapshot() {
        let mut h = harness(300, beijing(14, 0, 0));
        h.dashboard.set_fail_reset(true);

        let (report, sleep) = h.schedule.step().await;

        let failure = report.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::Reset);
        let sent = h.alerter.sent();
        assert_eq!(sent[0].subject, "ResetFailure");
        assert!(sent[0].body.contains("Last known usage: 300/20,000 (2%)"));
        assert_eq!(sleep, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn consecutive_failures_back_off() {
        let mut h = harness(18_881, beijing(14, 0, 0));
        h.dashboard.set_fail_fetch(true);

        let mut sleeps = Vec::new();
        for _ in 0..3 {
            let (_, sleep) = h.schedule.step().await;
            sleeps.push(sleep);
        }
        assert_eq!(
            sleeps,
            vec![
                Duration::from_secs(60),
                Duration::from_secs(120),
                Duration::from_secs(240)
            ]
        );
        assert!(h.alerter.sent()[2].body.contains("Consecutive failures: 3"));

        h.dashboard.set_fail_fetch(false);
        let (report, sleep) = h.schedule.step().await;
        assert!(!report.is_failure());
        assert_eq!(h.schedule.state().consecutive_failures, 0);
        assert_eq!(sleep, Duration::from_secs(30 * 60));
    }

    #[tokio::test]
    async fn alert_failure_does_not_stop_the_loop() {
        let mut h = harness(18_881, beijing(14, 0, 0));
        h.dashboard.set_fail_fetch(true);
        h.alerter.set_fail(true);

        let first = h.schedule.run_iteration().await;
        assert!(first.is_failure());
        assert!(!first.alerted);
        assert_eq!(h.alerter.attempt_count(), 1);

        h.dashboard.set_fail_fetch(false);
        let second = h.schedule.run_iteration().await;
        assert!(!second.is_failure());
        // No retry of the lost alert
        assert_eq!(h.alerter.attempt_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_alerter_is_bounded() {
        let mut h = harness(18_881, beijing(14, 0, 0));
        h.dashboard.set_fail_fetch(true);
        h.alerter.set_hang(true);

        let report = h.schedule.run_iteration().await;
        assert!(report.is_failure());
        assert!(!report.alerted);
    }

    #[tokio::test]
    async fn fetch_failure_alert_uses_remembered_snapshot() {
        let dashboard = MockDashboard::new(18_881, 20_000)
            .with_script([MockFetch::Usage { current: 18_881, ceiling: 20_000 }, MockFetch::Fail("502".into())]);
        let dashboard = Arc::new(dashboard);
        let alerter = Arc::new(MockAlerter::new());
        let mut schedule = ScheduleLoop::new(&ScheduleConfig::default(), dashboard, alerter.clone())
            .with_clock(Arc::new(ManualClock::new(beijing(14, 0, 0))));

        schedule.run_iteration().await;
        schedule.run_iteration().await;

        let sent = alerter.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body.contains("18,881/20,000"));
    }

    #[tokio::test]
    async fn evaluate_never_resets() {
        let mut h = harness(300, beijing(23, 58, 0));
        let report = h.schedule.evaluate().await;

        assert!(report.decision.unwrap().should_reset);
        assert!(report.attempt.is_none());
        assert_eq!(h.dashboard.reset_count(), 0);

        h.dashboard.set_fail_fetch(true);
        let failed = h.schedule.evaluate().await;
        assert!(failed.is_failure());
        assert!(h.alerter.sent().is_empty());
    }

    #[tokio::test]
    async fn force_reset_ignores_policy() {
        let mut h = harness(18_881, beijing(14, 0, 0));
        let report = h.schedule.force_reset().await;

        assert!(report.decision.is_none());
        assert!(report.attempt.unwrap().succeeded);
        assert_eq!(h.dashboard.performed_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown() {
        let mut h = harness(18_881, beijing(14, 0, 0));
        let mut events = h.schedule.subscribe();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let shutdown = async {
            let _ = rx.await;
        };

        let run = async {
            h.schedule.run(shutdown).await;
        };
        let stop = async {
            // Wait for the first iteration, then stop during the sleep
            while let Some(event) = events.recv().await {
                if matches!(event, LoopEvent::Sleeping { .. }) {
                    break;
                }
            }
            let _ = tx.send(());
        };
        tokio::join!(run, stop);

        assert_eq!(h.schedule.state().iterations, 1);
        assert_eq!(h.dashboard.fetch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_polls_again_after_sleeping() {
        let mut h = harness(18_881, beijing(14, 0, 0));
        let mut events = h.schedule.subscribe();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let shutdown = async {
            let _ = rx.await;
        };

        let run = async {
            h.schedule.run(shutdown).await;
        };
        let stop = async {
            let mut completed = 0;
            while let Some(event) = events.recv().await {
                if matches!(event, LoopEvent::IterationCompleted(_)) {
                    completed += 1;
                    if completed == 3 {
                        break;
                    }
                }
            }
            let _ = tx.send(());
        };
        tokio::join!(run, stop);

        assert_eq!(h.dashboard.fetch_count(), 3);
    }

    /// Panics on the first `panics` calls of one operation, then behaves
    struct PanickyDashboard {
        inner: MockDashboard,
        panics: AtomicU32,
        on_reset: bool,
    }

    impl PanickyDashboard {
        fn new(inner: MockDashboard, panics: u32, on_reset: bool) -> Self {
            Self {
                inner,
                panics: AtomicU32::new(panics),
                on_reset,
            }
        }

        fn should_panic(&self) -> bool {
            self.panics
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    #[async_trait::async_trait]
    impl DashboardClient for PanickyDashboard {
        async fn fetch_usage(&self) -> RemoteResult<UsageSnapshot> {
            if !self.on_reset && self.should_panic() {
                panic!("usage selector matched nothing sensible");
            }
            self.inner.fetch_usage().await
        }

        async fn attempt_reset(&self) -> RemoteResult<ResetAck> {
            if self.on_reset && self.should_panic() {
                panic!("reset button vanished");
            }
            self.inner.attempt_reset().await
        }
    }

    fn panicky_loop(
        dashboard: Arc<PanickyDashboard>,
        alerter: Arc<MockAlerter>,
    ) -> ScheduleLoop {
        ScheduleLoop::new(&ScheduleConfig::default(), dashboard, alerter)
            .with_clock(Arc::new(ManualClock::new(beijing(14, 0, 0))))
    }

    #[tokio::test]
    async fn panicking_fetch_becomes_a_failure() {
        let dashboard = Arc::new(PanickyDashboard::new(MockDashboard::new(18_881, 20_000), 1, false));
        let alerter = Arc::new(MockAlerter::new());
        let mut schedule = panicky_loop(dashboard.clone(), alerter.clone());

        let (report, sleep) = schedule.step().await;
        let failure = report.failure.as_ref().unwrap();
        assert_eq!(failure.kind, FailureKind::Fetch);
        assert!(failure.detail.contains("usage selector matched nothing sensible"));
        assert!(report.alerted);
        assert_eq!(sleep, Duration::from_secs(60));
        assert_eq!(schedule.state().consecutive_failures, 1);

        let sent = alerter.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "FetchFailure");

        // Next iteration runs normally
        let (report, _) = schedule.step().await;
        assert!(!report.is_failure());
        assert_eq!(schedule.state().consecutive_failures, 0);
        assert_eq!(dashboard.inner.fetch_count(), 1);
    }

    #[tokio::test]
    async fn panicking_reset_becomes_a_reset_failure() {
        let dashboard = Arc::new(PanickyDashboard::new(MockDashboard::new(300, 20_000), 1, true));
        let alerter = Arc::new(MockAlerter::new());
        let mut schedule = panicky_loop(dashboard.clone(), alerter.clone());

        let (report, _) = schedule.step().await;
        assert_eq!(report.failure.as_ref().unwrap().kind, FailureKind::Reset);

        let sent = alerter.sent();
        assert_eq!(sent[0].subject, "ResetFailure");
        assert!(sent[0].body.contains("reset button vanished"));
        assert!(sent[0].body.contains("Last known usage: 300/20,000 (2%)"));
        assert_eq!(dashboard.inner.performed_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn run_survives_a_panicking_iteration() {
        let dashboard = Arc::new(PanickyDashboard::new(MockDashboard::new(18_881, 20_000), 1, false));
        let alerter = Arc::new(MockAlerter::new());
        let mut schedule = panicky_loop(dashboard.clone(), alerter.clone());
        let mut events = schedule.subscribe();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let run = async {
            schedule
                .run(async {
                    let _ = rx.await;
                })
                .await;
        };
        let stop = async {
            let mut reports = Vec::new();
            while let Some(event) = events.recv().await {
                if let LoopEvent::IterationCompleted(report) = event {
                    reports.push(report);
                    if reports.len() == 2 {
                        break;
                    }
                }
            }
            let _ = tx.send(());
            reports
        };
        let ((), reports) = tokio::join!(run, stop);

        assert!(reports[0].is_failure());
        assert!(!reports[1].is_failure());
        assert_eq!(alerter.sent().len(), 1);
        assert_eq!(dashboard.inner.fetch_count(), 1);
    }

    #[test]
    fn panic_payloads_are_described() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_detail(owned.as_ref()), "owned message");

        let borrowed: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_detail(borrowed.as_ref()), "static message");

        let other: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_detail(other.as_ref()), "panic with a non-string payload");
    }

    #[test]
    fn alert_body_lists_everything() {
        let failure = IterationFailure::new(FailureKind::Fetch, "connection refused");
        let snapshot = UsageSnapshot::new(18_881, 20_000, beijing(13, 30, 0));
        let body = alert_body(beijing(14, 0, 0), &failure, Some(&snapshot), 2);

        assert!(body.contains("Time: 2025-12-25 14:00:00 +08:00"));
        assert!(body.contains("Failure: FetchFailure"));
        assert!(body.contains("Detail: connection refused"));
        assert!(body.contains("Last known usage: 18,881/20,000 (94%) (observed 2025-12-25 13:30:00 +08:00)"));
        assert!(body.contains("Consecutive failures: 2"));

        let unknown = alert_body(beijing(14, 0, 0), &failure, None, 1);
        assert!(unknown.contains("Last known usage: unknown"));
    }
}

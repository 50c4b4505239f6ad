//! Integration tests for refilld
//!
//! These tests verify the end-to-end behavior of the daemon: configuration
//! feeding the schedule loop, the loop driving the capabilities, and the
//! single-instance guard.

use chrono::{DateTime, FixedOffset, TimeZone};
use refill_api::{FailureKind, ResetReason};
use refill_config::{ScheduleConfig, parse_config};
use refill_core::{LoopEvent, ManualClock, ScheduleLoop};
use refill_remote_api::{Alerter, DashboardClient, MockAlerter, MockDashboard};
use refill_util::InstanceGuard;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

const CONFIG: &str = r#"
    config_version = 1

    [schedule]
    threshold = 500
    window_start = "23:58"
    window_end = "23:59"
    timezone = "+08:00"

    [dashboard]
    login_url = "https://dash.example.com/login"
    dashboard_url = "https://dash.example.com/dashboard"
    username = "me@example.com"
    password = "hunter2"
"#;

fn beijing(hour: u32, minute: u32, second: u32) -> DateTime<FixedOffset> {
    FixedOffset::east_opt(8 * 3600)
        .unwrap()
        .with_ymd_and_hms(2025, 12, 25, hour, minute, second)
        .unwrap()
}

fn schedule_from_config() -> ScheduleConfig {
    parse_config(CONFIG).unwrap().schedule
}

fn make_loop(
    schedule: &ScheduleConfig,
    dashboard: Arc<MockDashboard>,
    alerter: Arc<MockAlerter>,
    clock: Arc<ManualClock>,
) -> ScheduleLoop {
    let dashboard: Arc<dyn DashboardClient> = dashboard;
    let alerter: Arc<dyn Alerter> = alerter;
    ScheduleLoop::new(schedule, dashboard, alerter).with_clock(clock)
}

#[tokio::test]
async fn test_configured_window_triggers_reset() {
    let schedule = schedule_from_config();
    let dashboard = Arc::new(MockDashboard::new(18_881, 20_000));
    let alerter = Arc::new(MockAlerter::new());
    let clock = Arc::new(ManualClock::new(beijing(14, 0, 0)));
    let mut schedule_loop = make_loop(&schedule, dashboard.clone(), alerter.clone(), clock.clone());

    // Afternoon: nothing to do
    let (report, _) = schedule_loop.step().await;
    assert_eq!(report.decision.unwrap().reason, ResetReason::NoneMatched);
    assert_eq!(dashboard.reset_count(), 0);

    // Window opens
    clock.set(beijing(23, 58, 5));
    let (report, sleep) = schedule_loop.step().await;
    assert_eq!(report.decision.unwrap().reason, ResetReason::InTimeWindow);
    assert!(report.attempt.unwrap().succeeded);
    assert_eq!(dashboard.performed_count(), 1);
    assert_eq!(dashboard.usage(), (20_000, 20_000));
    assert!(sleep > Duration::from_secs(23 * 3600));

    // Still inside the window on a later poll: the remote refuses politely
    clock.set(beijing(23, 59, 0));
    let report = schedule_loop.run_iteration().await;
    let attempt = report.attempt.unwrap();
    assert!(attempt.succeeded);
    assert!(attempt.already_used);
    assert_eq!(dashboard.performed_count(), 1);

    assert!(alerter.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_outage_alerts_then_recovers() {
    let schedule = schedule_from_config();
    let dashboard = Arc::new(MockDashboard::new(18_881, 20_000));
    let alerter = Arc::new(MockAlerter::new());
    let clock = Arc::new(ManualClock::new(beijing(14, 0, 0)));
    let mut schedule_loop = make_loop(&schedule, dashboard.clone(), alerter.clone(), clock);

    dashboard.set_hang_fetch(true);
    let (report, sleep) = schedule_loop.step().await;
    assert!(report.decision.is_none());
    assert_eq!(report.failure.unwrap().kind, FailureKind::Fetch);
    assert_eq!(sleep, Duration::from_secs(60));

    dashboard.set_hang_fetch(false);
    let (report, sleep) = schedule_loop.step().await;
    assert!(!report.is_failure());
    assert_eq!(sleep, Duration::from_secs(30 * 60));

    let sent = alerter.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "FetchFailure");
}

#[tokio::test(start_paused = true)]
async fn test_run_loop_emits_events_until_shutdown() {
    let schedule = schedule_from_config();
    let dashboard = Arc::new(MockDashboard::new(300, 20_000));
    let alerter = Arc::new(MockAlerter::new());
    let clock = Arc::new(ManualClock::new(beijing(14, 0, 0)));
    let mut schedule_loop = make_loop(&schedule, dashboard.clone(), alerter, clock);
    let mut events = schedule_loop.subscribe();

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let run = async {
        schedule_loop
            .run(async {
                let _ = rx.await;
            })
            .await;
    };
    let observe = async {
        let mut seen = Vec::new();
        while let Some(event) = events.recv().await {
            let sleeping = matches!(event, LoopEvent::Sleeping { .. });
            seen.push(event);
            if sleeping {
                break;
            }
        }
        let _ = tx.send(());
        seen
    };
    let ((), seen) = tokio::join!(run, observe);

    assert!(matches!(&seen[0], LoopEvent::IterationCompleted(report)
        if report.decision.unwrap().reason == ResetReason::BelowThreshold));
    assert!(matches!(&seen[1], LoopEvent::Sleeping { .. }));
    assert_eq!(dashboard.performed_count(), 1);
    assert!(matches!(events.recv().await, Some(LoopEvent::Stopped)));
}

#[test]
fn test_only_one_instance_holds_the_guard() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("refilld.lock");

    let mut first = InstanceGuard::new(&path);
    let mut second = InstanceGuard::new(&path);

    assert!(first.acquire_exclusivity().unwrap());
    assert!(!second.acquire_exclusivity().unwrap());
    assert!(first.is_held());
    assert!(!second.is_held());

    // The loser can see who is in charge
    let holder = second.holder().unwrap();
    assert_eq!(holder.pid, std::process::id());
    assert!(holder.is_alive());

    first.release();
    assert!(second.acquire_exclusivity().unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_instances_reset_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("refilld.lock");
    let schedule = schedule_from_config();
    let dashboard = Arc::new(MockDashboard::new(18_881, 20_000));

    // Both instances start inside the window and race for the lock
    let start = Arc::new(Barrier::new(2));
    let contested = Arc::new(Barrier::new(2));

    let mut instances = Vec::new();
    for _ in 0..2 {
        let path = path.clone();
        let schedule = schedule.clone();
        let dashboard = dashboard.clone();
        let start = start.clone();
        let contested = contested.clone();

        instances.push(tokio::spawn(async move {
            let mut guard = InstanceGuard::new(&path);
            start.wait().await;
            let won = guard.acquire_exclusivity().unwrap();
            // Nobody releases before both have tried
            contested.wait().await;

            if won {
                let clock = Arc::new(ManualClock::new(beijing(23, 58, 0)));
                let mut schedule_loop =
                    make_loop(&schedule, dashboard, Arc::new(MockAlerter::new()), clock);
                let report = schedule_loop.run_iteration().await;
                assert!(report.attempt.unwrap().succeeded);
            }
            (won, guard)
        }));
    }

    let mut winners = 0;
    let mut guards = Vec::new();
    for instance in instances {
        let (won, guard) = instance.await.unwrap();
        winners += usize::from(won);
        guards.push(guard);
    }

    assert_eq!(winners, 1);
    assert_eq!(guards.iter().filter(|g| g.is_held()).count(), 1);
    assert_eq!(dashboard.reset_count(), 1);
    assert_eq!(dashboard.performed_count(), 1);
}

#[test]
fn test_guard_released_on_drop() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("refilld.lock");

    {
        let mut guard = InstanceGuard::new(&path);
        assert!(guard.acquire_exclusivity().unwrap());
    }

    let mut next = InstanceGuard::new(&path);
    assert!(next.acquire_exclusivity().unwrap());
}

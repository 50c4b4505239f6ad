//! refilld - The refill background service
//!
//! This is the main entry point for the refilld service.
//! It wires together all the components:
//! - Configuration loading
//! - Single-instance guard
//! - Dashboard client and alerter
//! - Schedule loop
//! - Signal handling

use anyhow::{Context, Result, bail};
use clap::Parser;
use refill_api::IterationReport;
use refill_config::{Settings, load_config};
use refill_core::ScheduleLoop;
use refill_remote_web::{build_alerter, build_dashboard};
use refill_util::{InstanceGuard, default_config_path, format_datetime_full, format_duration};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// How long `--replace` waits for the running instance to let go
const REPLACE_TIMEOUT: Duration = Duration::from_secs(10);
const REPLACE_POLL: Duration = Duration::from_millis(250);

/// refilld - Keeps a dashboard's usage counter topped up
#[derive(Parser, Debug)]
#[command(name = "refilld")]
#[command(about = "Resets a dashboard usage counter when it runs low or the daily window opens", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/refill/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Lock file override (or set REFILL_LOCK env var)
    #[arg(long, env = "REFILL_LOCK")]
    lock_file: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Fetch usage and print the decision, without resetting
    #[arg(long, conflicts_with_all = ["once", "force_reset"])]
    check: bool,

    /// Run a single iteration and exit
    #[arg(long, conflicts_with = "force_reset")]
    once: bool,

    /// Reset immediately, ignoring the policy, and exit
    #[arg(long)]
    force_reset: bool,

    /// Ask a running instance to exit and take over from it
    #[arg(long)]
    replace: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Daemon,
    Check,
    Once,
    ForceReset,
}

impl Args {
    fn mode(&self) -> Mode {
        if self.check {
            Mode::Check
        } else if self.once {
            Mode::Once
        } else if self.force_reset {
            Mode::ForceReset
        } else {
            Mode::Daemon
        }
    }
}

/// Main service state
struct Service {
    settings: Settings,
    schedule: ScheduleLoop,
}

impl Service {
    fn new(args: &Args) -> Result<Self> {
        let settings = load_config(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?;

        info!(
            config_path = %args.config.display(),
            threshold = settings.schedule.threshold,
            window = %settings.schedule.window,
            dashboard = %settings.dashboard.dashboard_url,
            "Configuration loaded"
        );

        let call_timeout = settings.schedule.call_timeout;
        let dashboard = build_dashboard(&settings.dashboard, call_timeout)
            .context("Failed to create dashboard client")?;
        let alerter = build_alerter(settings.email.as_ref(), call_timeout)
            .context("Failed to create alerter")?;

        let schedule = ScheduleLoop::new(&settings.schedule, dashboard, alerter);

        Ok(Self { settings, schedule })
    }

    /// Become the single active instance, replacing a running one if asked
    async fn acquire_guard(&self, args: &Args) -> Result<InstanceGuard> {
        let lock_path = args
            .lock_file
            .clone()
            .unwrap_or_else(|| self.settings.service.lock_file.clone());
        let mut guard = InstanceGuard::new(&lock_path);

        if guard
            .acquire_exclusivity()
            .with_context(|| format!("Failed to open lock file {:?}", lock_path))?
        {
            info!(lock_file = %lock_path.display(), "Instance lock acquired");
            return Ok(guard);
        }

        if !args.replace {
            let holder = guard
                .holder()
                .map(|h| format!("pid {}", h.pid))
                .unwrap_or_else(|| "unknown process".into());
            bail!(
                "Another instance ({}) holds {:?}; use --replace to take over",
                holder,
                lock_path
            );
        }

        let signalled = guard
            .request_holder_exit()
            .context("Failed to signal running instance")?;
        info!(pid = ?signalled, "Waiting for running instance to exit");

        let deadline = tokio::time::Instant::now() + REPLACE_TIMEOUT;
        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(REPLACE_POLL).await;
            if guard.acquire_exclusivity()? {
                info!(lock_file = %lock_path.display(), "Took over from previous instance");
                return Ok(guard);
            }
        }

        bail!(
            "Running instance did not exit within {}",
            format_duration(REPLACE_TIMEOUT)
        )
    }

    /// Fetch and decide, print the result, touch nothing
    async fn check(&mut self) -> Result<()> {
        let report = self.schedule.evaluate().await;
        print_report(&report);
        match report.failure {
            Some(failure) => bail!("{}: {}", failure.kind, failure.detail),
            None => Ok(()),
        }
    }

    async fn run_once(&mut self, force: bool) -> Result<()> {
        let report = if force {
            self.schedule.force_reset().await
        } else {
            self.schedule.run_iteration().await
        };
        print_report(&report);
        match report.failure {
            Some(failure) => bail!("{}: {}", failure.kind, failure.detail),
            None => Ok(()),
        }
    }

    async fn run(&mut self) -> Result<()> {
        // Set up signal handlers
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
        let mut sighup =
            signal(SignalKind::hangup()).context("Failed to create SIGHUP handler")?;

        let shutdown = async move {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully"),
                _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully"),
                _ = sighup.recv() => info!("Received SIGHUP, shutting down gracefully"),
            }
        };

        info!("Service running");
        self.schedule.run(shutdown).await;

        info!("Shutdown complete");
        Ok(())
    }
}

fn print_report(report: &IterationReport) {
    println!("Time:     {}", format_datetime_full(&report.started_at));
    match &report.snapshot {
        Some(snapshot) => println!("Usage:    {}", snapshot),
        None => println!("Usage:    unavailable"),
    }
    if let Some(decision) = &report.decision {
        println!(
            "Decision: {} ({})",
            if decision.should_reset { "reset" } else { "hold" },
            decision.reason
        );
    }
    if let Some(attempt) = &report.attempt {
        let outcome = match (attempt.succeeded, attempt.already_used) {
            (true, true) => "already used today".to_string(),
            (true, false) => "performed".to_string(),
            (false, _) => format!(
                "failed: {}",
                attempt.error_detail.as_deref().unwrap_or("unknown error")
            ),
        };
        println!("Reset:    {}", outcome);
        if let Some(after) = &attempt.snapshot_after {
            println!("After:    {}", after);
        }
    }
    if let Some(failure) = &report.failure {
        println!("Failure:  {} ({})", failure.kind, failure.detail);
        println!("Alerted:  {}", if report.alerted { "yes" } else { "no" });
    }
}

async fn run(args: Args) -> Result<()> {
    let mut service = Service::new(&args)?;
    let mode = args.mode();

    if mode == Mode::Check {
        return service.check().await;
    }

    // Held until the process exits
    let _guard = service.acquire_guard(&args).await?;

    match mode {
        Mode::Once => service.run_once(false).await,
        Mode::ForceReset => service.run_once(true).await,
        Mode::Daemon | Mode::Check => service.run().await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "refilld starting");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = format!("{:#}", e), "refilld failed");
            ExitCode::FAILURE
        }
    }
}

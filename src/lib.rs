pub mod config;
pub mod db;
pub mod error;
pub mod fetch;
pub mod models;
pub mod notify;
pub mod reconcile;
pub mod utils;

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::AppConfig;
use db::Store;
use error::WatchError;
use fetch::LaunchFetcher;
use models::{Launch, ReconcileSummary};
use notify::{render_digest, Mailer};

#[derive(Debug, Parser)]
#[command(name = "launch-watch", version, about = "Mail a digest of launch schedule changes")]
struct Cli {
    /// Config file (defaults to $LAUNCH_WATCH_CONFIG or the data directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// SQLite database file, overriding the config
    #[arg(long, global = true)]
    database: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch, reconcile and mail today's changes once
    Run {
        /// Reconcile but do not send mail
        #[arg(long)]
        dry_run: bool,
    },
    /// Run a cycle every interval until interrupted
    Watch {
        #[arg(long, default_value_t = 60)]
        interval_minutes: u64,
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the launches changed on a UTC date as JSON
    Changes {
        /// Defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[derive(Debug, Clone)]
pub struct CycleOptions {
    pub config: AppConfig,
    pub database: PathBuf,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub summary: ReconcileSummary,
    pub changes: usize,
    pub sent: bool,
}

/// Reconciles an already fetched batch and hands today's changes to the mailer.
pub fn apply_cycle(
    store: &mut Store,
    fresh: &[Launch],
    now: DateTime<Utc>,
    config: &AppConfig,
    dry_run: bool,
) -> Result<CycleReport, WatchError> {
    let summary = reconcile::reconcile(store, fresh, now)?;
    info!(
        pruned = summary.pruned,
        cancelled = summary.cancelled,
        inserted = summary.inserted,
        updated = summary.updated,
        unchanged = summary.unchanged,
        stale = summary.stale,
        "reconciled launches"
    );

    let today = now.date_naive();
    let changes = store.todays_changes(today)?;
    let mut report = CycleReport {
        summary,
        changes: changes.len(),
        sent: false,
    };

    let Some(digest) = render_digest(&changes, today, config.tz()?) else {
        info!(%today, "no launch changes today");
        return Ok(report);
    };

    match (&config.mail, dry_run) {
        (Some(mail), false) => {
            Mailer::new(mail.clone()).send(&digest)?;
            report.sent = true;
        }
        (None, _) => warn!(subject = %digest.subject, "mail is not configured, digest not sent"),
        (Some(_), true) => info!(subject = %digest.subject, "dry run, digest not sent"),
    }
    Ok(report)
}

/// One full cycle: open the store, fetch upstream, reconcile, notify.
pub fn run_once(options: &CycleOptions) -> Result<CycleReport, WatchError> {
    let mut store = Store::open(&options.database)?;
    let fetcher = LaunchFetcher::new(options.config.upstream.clone())?;
    let fresh = fetcher.fetch_upcoming()?;
    apply_cycle(
        &mut store,
        &fresh,
        Utc::now(),
        &options.config,
        options.dry_run,
    )
}

/// Runs a cycle on every tick until `shutdown` resolves and returns how many
/// cycles ran. Shutdown is checked before each tick.
async fn watch(
    options: CycleOptions,
    interval: Duration,
    shutdown: impl Future<Output = ()>,
) -> usize {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);
    let mut cycles = 0;

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!(cycles, "interrupted, stopping watch");
                break;
            }
            _ = ticker.tick() => {
                cycles += 1;
                let cycle_options = options.clone();
                match tokio::task::spawn_blocking(move || run_once(&cycle_options)).await {
                    Ok(Ok(report)) => info!(changes = report.changes, sent = report.sent, "cycle finished"),
                    Ok(Err(err)) => warn!(error = %err, "cycle failed"),
                    Err(err) => error!(error = %err, "cycle task panicked"),
                }
            }
        }
    }

    cycles
}

async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "cannot listen for ctrl-c");
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "launch_watch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config_path = cli.config.unwrap_or_else(utils::config_path);
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;
    let database = cli
        .database
        .or_else(|| config.database_path.clone())
        .unwrap_or_else(utils::database_path);

    match cli.command {
        Command::Run { dry_run } => {
            let options = CycleOptions {
                config,
                database,
                dry_run,
            };
            let report = run_once(&options).context("launch cycle failed")?;
            info!(changes = report.changes, sent = report.sent, "cycle finished");
        }
        Command::Watch {
            interval_minutes,
            dry_run,
        } => {
            anyhow::ensure!(interval_minutes > 0, "--interval-minutes must be positive");
            let options = CycleOptions {
                config,
                database,
                dry_run,
            };
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("starting async runtime")?;
            info!(interval_minutes, "watching for launch changes");
            runtime.block_on(watch(
                options,
                Duration::from_secs(interval_minutes * 60),
                ctrl_c(),
            ));
        }
        Command::Changes { date } => {
            let store = Store::open(&database)
                .with_context(|| format!("opening {}", database.display()))?;
            let day = date.unwrap_or_else(|| Utc::now().date_naive());
            let changes = store.todays_changes(day)?;
            println!("{}", serde_json::to_string_pretty(&changes)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn launch(id: &str, when: DateTime<Utc>) -> Launch {
        Launch {
            id: id.to_string(),
            name: format!("Starship | {id}"),
            provider_name: "SpaceX".to_string(),
            location_name: "Starbase, TX, USA".to_string(),
            image_url: String::new(),
            scheduled_time: when,
            upstream_last_modified: when,
        }
    }

    #[test]
    fn cycle_without_mail_config_reports_but_does_not_send() {
        let mut store = Store::in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 6, 0, 0).unwrap();
        let batch = vec![launch("a", now + ChronoDuration::days(2))];

        let report = apply_cycle(&mut store, &batch, now, &AppConfig::default(), false).unwrap();
        assert_eq!(report.summary.inserted, 1);
        assert_eq!(report.changes, 1);
        assert!(!report.sent);
    }

    #[test]
    fn dry_run_never_sends() {
        let mut store = Store::in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 6, 0, 0).unwrap();
        let config = AppConfig {
            mail: Some(config::MailConfig {
                smtp_host: "smtp.invalid".to_string(),
                from: "launches@example.com".to_string(),
                to: vec!["ops@example.com".to_string()],
                ..config::MailConfig::default()
            }),
            ..AppConfig::default()
        };
        let batch = vec![launch("a", now + ChronoDuration::days(2))];

        let report = apply_cycle(&mut store, &batch, now, &config, true).unwrap();
        assert_eq!(report.changes, 1);
        assert!(!report.sent);
    }

    #[test]
    fn quiet_day_has_no_changes() {
        let mut store = Store::in_memory().unwrap();
        let day_one = Utc.with_ymd_and_hms(2026, 10, 16, 6, 0, 0).unwrap();
        let batch = vec![launch("a", day_one + ChronoDuration::days(5))];
        apply_cycle(&mut store, &batch, day_one, &AppConfig::default(), true).unwrap();

        let day_two = day_one + ChronoDuration::days(1);
        let report = apply_cycle(&mut store, &batch, day_two, &AppConfig::default(), true).unwrap();
        assert!(report.summary.is_noop());
        assert_eq!(report.changes, 0);
    }

    #[tokio::test]
    async fn watch_stops_before_first_cycle_when_already_shut_down() {
        let dir = tempfile::tempdir().unwrap();
        let database = dir.path().join("launches.sqlite");
        let options = CycleOptions {
            config: AppConfig::default(),
            database: database.clone(),
            dry_run: true,
        };
        let cycles = watch(options, Duration::from_millis(10), std::future::ready(())).await;
        assert_eq!(cycles, 0);
        assert!(!database.exists());
    }

    #[tokio::test]
    async fn watch_keeps_one_shutdown_signal_across_ticks() {
        let dir = tempfile::tempdir().unwrap();
        // a directory is not a database, so each cycle fails before fetching
        let options = CycleOptions {
            config: AppConfig::default(),
            database: dir.path().to_path_buf(),
            dry_run: true,
        };
        let shutdown = tokio::time::sleep(Duration::from_millis(300));
        let cycles = watch(options, Duration::from_millis(50), shutdown).await;
        assert!(cycles >= 2, "ran {cycles} cycles");
    }

    #[test]
    fn cli_parses_watch_options() {
        let cli = Cli::try_parse_from([
            "launch-watch",
            "--database",
            "/tmp/l.sqlite",
            "watch",
            "--interval-minutes",
            "15",
            "--dry-run",
        ])
        .unwrap();
        assert_eq!(cli.database, Some(PathBuf::from("/tmp/l.sqlite")));
        assert!(matches!(
            cli.command,
            Command::Watch {
                interval_minutes: 15,
                dry_run: true
            }
        ));
    }

    #[test]
    fn cli_parses_changes_date() {
        let cli = Cli::try_parse_from(["launch-watch", "changes", "--date", "2026-10-16"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Changes { date: Some(d) } if d == NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
        ));
    }
}

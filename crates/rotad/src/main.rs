use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use tracing::{info, warn};

use rota_core::config::RotaConfig;
use rota_core::{JobName, WorkerId};
use rota_lease::{LockStore, SqliteLockStore};
use rota_scheduler::{EngineSettings, JobRegistry, RunHistory, SchedulerEngine};

#[derive(Parser, Debug)]
#[command(name = "rotad")]
#[command(version)]
#[command(about = "Distributed exclusive-job scheduler over a shared SQLite database")]
#[command(propagate_version = true)]
struct Args {
    /// Path to rota.toml (falls back to ROTA_CONFIG, then ~/.rota/rota.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the scheduler loop until interrupted
    Run,

    /// Execute a single scheduling pass and exit
    Tick,

    /// Show every registered job and its lease state
    Status,

    /// Show recent runs, newest first
    History {
        /// Only runs of this job
        job: Option<String>,

        /// Maximum rows to print
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Clear a job's lease no matter who holds it
    Release {
        /// Job whose lease to clear
        job: String,
    },

    /// Parse the config and print the jobs it declares
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rotad=info,rota_scheduler=info,rota_lease=info".into()),
        )
        .init();

    let args = Args::parse();

    // load config: explicit path > ROTA_CONFIG env > ~/.rota/rota.toml
    let config = RotaConfig::load(args.config.as_deref()).context("loading config")?;

    match args.command {
        Commands::Run => run(config).await,
        Commands::Tick => tick(config).await,
        Commands::Status => status(config),
        Commands::History { job, limit } => history(config, job, limit),
        Commands::Release { job } => release(config, &job),
        Commands::Validate => validate(config),
    }
}

async fn run(config: RotaConfig) -> anyhow::Result<()> {
    migrate(&config)?;

    let worker = worker_identity(&config);
    let engine = build_engine(&config, worker.clone())?;
    if engine.jobs().is_empty() {
        warn!("no jobs declared in config, the engine will idle");
    }
    info!(worker = %worker, jobs = engine.jobs().len(), "rotad starting");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let engine_task = tokio::spawn(async move { engine.run(shutdown_rx).await });

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, shutting down");
    let _ = shutdown_tx.send(true);
    engine_task.await?;
    Ok(())
}

async fn tick(config: RotaConfig) -> anyhow::Result<()> {
    migrate(&config)?;

    let worker = worker_identity(&config);
    let engine = build_engine(&config, worker)?;

    let report = engine.tick_at(Utc::now()).await;
    for run in &report.ran {
        println!(
            "{:<38} {:<9} {}",
            run.job_name.as_str(),
            run.status.to_string(),
            fmt_duration(run.duration_ms)
        );
    }
    println!("{} ran, {} skipped", report.ran.len(), report.skipped.len());
    // Job failures are visible in the report and the run history; only
    // infrastructure errors make this command exit non-zero.
    Ok(())
}

fn status(config: RotaConfig) -> anyhow::Result<()> {
    migrate(&config)?;
    let store = SqliteLockStore::new(open_db(&config)?);

    let leases = store.list()?;
    if leases.is_empty() {
        println!("No jobs registered.");
        return Ok(());
    }

    let now = Utc::now();
    println!(
        "{:<38} {:<9} {:<17} {:<17} {:>5} {:>7} OWNER",
        "JOB", "STATUS", "NEXT DUE", "LAST RUN", "RUNS", "MISSED"
    );
    println!("{}", "-".repeat(104));
    for lease in leases {
        let owner = if lease.is_held(now) {
            lease
                .owner_id
                .as_ref()
                .map(|o| o.to_string())
                .unwrap_or_else(|| "-".to_string())
        } else {
            "-".to_string()
        };
        println!(
            "{:<38} {:<9} {:<17} {:<17} {:>5} {:>7} {}",
            lease.job_name.as_str(),
            lease.last_status.to_string(),
            fmt_instant(lease.next_due_at),
            fmt_instant(lease.last_run_at),
            lease.run_count,
            lease.missed_windows,
            owner
        );
    }
    Ok(())
}

fn history(config: RotaConfig, job: Option<String>, limit: usize) -> anyhow::Result<()> {
    migrate(&config)?;
    let history = RunHistory::new(open_db(&config)?)?;

    let job = job.map(|name| JobName::new(&name)).transpose()?;
    let runs = history.recent(job.as_ref(), limit)?;
    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }

    println!(
        "{:<38} {:<9} {:<17} {:>9} ERROR",
        "JOB", "STATUS", "STARTED", "DURATION"
    );
    println!("{}", "-".repeat(90));
    for run in runs {
        let error = fmt_error(run.error.as_deref());
        println!(
            "{:<38} {:<9} {:<17} {:>9} {}",
            run.job_name.as_str(),
            run.status.to_string(),
            run.started_at.format("%Y-%m-%d %H:%M"),
            fmt_duration(run.duration_ms),
            error
        );
    }
    Ok(())
}

fn release(config: RotaConfig, job: &str) -> anyhow::Result<()> {
    migrate(&config)?;
    let store = SqliteLockStore::new(open_db(&config)?);

    let name = JobName::new(job)?;
    if store.force_release(&name, Utc::now())? {
        println!("Released lease on {job}.");
    } else {
        println!("No live lease on {job}.");
    }
    Ok(())
}

fn validate(config: RotaConfig) -> anyhow::Result<()> {
    let registry = JobRegistry::from_config(&config)?;
    if registry.is_empty() {
        println!("Config OK, no jobs declared.");
        return Ok(());
    }

    println!("Config OK, {} job(s):", registry.len());
    for def in registry.definitions() {
        let state = if def.enabled { "" } else { " (disabled)" };
        println!(
            "  {:<38} {:<28} lease {}s{}",
            def.name.as_str(),
            def.schedule.to_string(),
            def.lease.num_seconds(),
            state
        );
    }
    Ok(())
}

/// Build an engine wired to fresh store and history connections, with every
/// config-declared job registered.
fn build_engine(config: &RotaConfig, worker: WorkerId) -> anyhow::Result<SchedulerEngine> {
    let store = Arc::new(SqliteLockStore::new(open_db(config)?));
    let history = Arc::new(RunHistory::new(open_db(config)?)?);
    let settings = EngineSettings::from_config(&config.scheduler);

    let mut engine = SchedulerEngine::new(store, history, worker, settings);
    engine.register_all(JobRegistry::from_config(config)?)?;
    Ok(engine)
}

fn worker_identity(config: &RotaConfig) -> WorkerId {
    match &config.node.worker_id {
        Some(id) => WorkerId::from(id.as_str()),
        None => WorkerId::generate(),
    }
}

/// Run all schema migrations (idempotent). Every subcommand calls this first,
/// so pointing rotad at an empty path just works.
fn migrate(config: &RotaConfig) -> anyhow::Result<()> {
    info!(path = %config.database.path, "opening SQLite database");
    let db = open_db(config)?;
    rota_lease::db::init_db(&db)?;
    rota_scheduler::db::init_db(&db)?;
    Ok(())
}

/// Open a fresh connection to the shared database. Each subsystem gets its
/// own connection; WAL keeps concurrent workers from serialising on the file.
fn open_db(config: &RotaConfig) -> anyhow::Result<Connection> {
    let path = &config.database.path;
    ensure_parent_dir(path);
    let db = Connection::open(path)
        .with_context(|| format!("opening database at {path}"))?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
    Ok(db)
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}

/// Error column cell, at most 40 characters. The cut is character-aware so
/// a multi-byte error message (localized tool stderr) is never split inside
/// a character.
fn fmt_error(error: Option<&str>) -> String {
    match error {
        None => "-".to_string(),
        Some(e) if e.len() <= 40 => e.to_string(),
        Some(e) => {
            let chars: Vec<char> = e.chars().collect();
            if chars.len() <= 40 {
                e.to_string()
            } else {
                let head: String = chars[..37].iter().collect();
                format!("{head}...")
            }
        }
    }
}

fn fmt_instant(at: Option<DateTime<Utc>>) -> String {
    match at {
        Some(t) => t.format("%Y-%m-%d %H:%M").to_string(),
        None => "-".to_string(),
    }
}

fn fmt_duration(ms: i64) -> String {
    if ms >= 1000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{ms}ms")
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `tfd`: the background daemon process. Owns the durable [`Store`], the
//! worker pool, and the Unix-socket listener that serves the Submission,
//! Control, and Subscription APIs (spec §6).

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fs2::FileExt;
use tf_core::{SystemClock, UuidIdGen};
use tf_daemon::config::{Config, ConfigError};
use tf_daemon::fanout::{Fanout, MetricsSnapshot};
use tf_daemon::listener::{ListenCtx, Listener};
use tf_daemon::CliSmallLmClient;
use tf_engine::{
    BudgetConfig, Gate, PriceTable, RateLimitConfig, SessionManager, StallSweeper, TaskManager,
    TaskManagerConfig, WorkerPool,
};
use tf_storage::Store;
use thiserror::Error;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("another daemon instance already holds the lock at {0}")]
    LockHeld(std::path::PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Store(#[from] tf_storage::StoreError),
}

/// Periodic metrics-snapshot cadence on the `metrics` fan-out channel
/// (spec §4.11: "every 2 s").
const METRICS_INTERVAL: Duration = Duration::from_secs(2);

/// Periodic WAL flush cadence; [`Store::checkpoint_and_truncate`] runs on
/// the coarser [`CHECKPOINT_INTERVAL`].
const FLUSH_INTERVAL: Duration = Duration::from_millis(200);

/// Checkpoint-and-truncate cadence.
const CHECKPOINT_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "--version" | "-V" | "-v" => {
                println!(
                    "tfd {}",
                    concat!(env!("CARGO_PKG_VERSION"), "+", env!("BUILD_GIT_HASH"))
                );
                return Ok(());
            }
            "--help" | "-h" | "help" => {
                println!(
                    "tfd {}",
                    concat!(env!("CARGO_PKG_VERSION"), "+", env!("BUILD_GIT_HASH"))
                );
                println!("Background daemon that owns task dispatch and orchestration state.");
                println!();
                println!("USAGE:");
                println!("    tfd");
                println!();
                println!("The daemon is typically started by the `tf` CLI and should not be");
                println!("invoked directly. It listens on a Unix socket for commands from `tf`.");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help       Print help information");
                println!("    -v, --version    Print version information");
                return Ok(());
            }
            _ => {
                eprintln!("error: unexpected argument '{arg}'");
                eprintln!("Usage: tfd [--help | --version]");
                std::process::exit(1);
            }
        }
    }

    let config = Config::load()?;
    rotate_log_if_needed(&config.log_path);
    write_startup_marker(&config)?;
    let log_guard = setup_logging(&config)?;

    info!("starting daemon");

    let lock_file = match acquire_lock(&config) {
        Ok(f) => f,
        Err(StartupError::LockHeld(path)) => {
            let pid = std::fs::read_to_string(&path).unwrap_or_default();
            eprintln!("tfd is already running");
            if !pid.trim().is_empty() {
                eprintln!("  pid: {}", pid.trim());
            }
            std::process::exit(1);
        }
        Err(e) => {
            write_startup_error(&config, &e);
            error!("failed to start daemon: {e}");
            drop(log_guard);
            return Err(e.into());
        }
    };

    if let Err(e) = run(&config).await {
        write_startup_error(&config, &e);
        error!("daemon exited with error: {e}");
        cleanup(&config);
        drop(lock_file);
        return Err(e.into());
    }

    cleanup(&config);
    drop(lock_file);
    info!("daemon stopped");
    Ok(())
}

async fn run(config: &Config) -> Result<(), StartupError> {
    let store = Store::open(&config.store_dir)?;

    let pool = WorkerPool::new(config.workers);
    let workspace_mgr = tf_adapters::WorkingCopyManager::new(
        config.workspaces_root.clone(),
        config.canonical_repo.clone(),
    );

    let rate_config = RateLimitConfig::default();
    let budget = BudgetConfig {
        daily_limit_usd: config.daily_cost_limit_usd,
        monthly_limit_usd: config.monthly_cost_limit_usd,
    };
    let price_table = PriceTable::fallback();
    let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
    let gate = Gate::new(store.clone(), rate_config, budget, price_table, now_ms);

    let task_manager_config = TaskManagerConfig {
        agent_command: config.agent_command.clone(),
        agent_args: config.agent_args.clone(),
        log_dir: config.logs_dir.clone(),
        task_timeout: config.task_timeout,
        model_api_key_var: config.model_api_key_var.clone(),
        model_api_key_value: config.model_api_key_value.clone(),
    };
    let manager = TaskManager::new(
        store.clone(),
        pool.clone(),
        workspace_mgr,
        gate,
        task_manager_config,
        SystemClock,
        UuidIdGen,
    );

    let sessions = SessionManager::new(store.clone());
    let fanout = Fanout::new();
    let classifier = CliSmallLmClient::new(
        config.classifier_command.clone(),
        config.classifier_args.clone(),
    );

    if config.socket_path.exists() {
        std::fs::remove_file(&config.socket_path)?;
    }
    let unix_listener = tokio::net::UnixListener::bind(&config.socket_path)?;

    let shutdown = Arc::new(Notify::new());
    let ctx = Arc::new(ListenCtx {
        store: store.clone(),
        manager,
        sessions,
        fanout: fanout.clone(),
        classifier,
        pool: pool.clone(),
        start_time: Instant::now(),
        shutdown: Arc::clone(&shutdown),
        default_model: config.model.clone(),
    });

    tokio::spawn(Listener::new(unix_listener, Arc::clone(&ctx)).run());
    tokio::spawn(tf_daemon::ingestor::run(
        store.clone(),
        fanout.clone(),
        config.sessions_path.clone(),
    ));
    spawn_metrics_publisher(Arc::clone(&ctx));
    spawn_stall_sweeper(store.clone(), fanout.clone());
    spawn_flush_task(store.clone());
    spawn_checkpoint_task(store.clone());

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    info!(socket = %config.socket_path.display(), "daemon ready");
    println!("READY");

    tokio::select! {
        _ = shutdown.notified() => info!("shutdown requested via command"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
    }

    if let Err(e) = store.checkpoint_and_truncate() {
        warn!("failed to checkpoint on shutdown: {e}");
    }

    Ok(())
}

fn spawn_metrics_publisher(ctx: Arc<ListenCtx>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(METRICS_INTERVAL);
        loop {
            interval.tick().await;
            let pool_status = ctx.pool.status();
            let tasks_pending = ctx
                .store
                .list_tasks(None, Some(tf_core::TaskState::Pending))
                .len();
            let tasks_running = ctx
                .store
                .list_tasks(None, Some(tf_core::TaskState::Running))
                .len();
            ctx.fanout.publish_metrics(MetricsSnapshot {
                uptime_secs: ctx.start_time.elapsed().as_secs(),
                tasks_pending,
                tasks_running,
                workers_busy: pool_status.active_workers,
                workers_total: pool_status.workers,
            });
        }
    });
}

fn spawn_stall_sweeper(store: Store, fanout: Fanout) {
    tokio::spawn(async move {
        let sweeper = StallSweeper::new(store.clone(), SystemClock);
        let mut interval = tokio::time::interval(tf_engine::stall::SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            for task_id in sweeper.sweep_once() {
                if let Some(task) = store.get_task(task_id.as_str()) {
                    fanout.publish_task(task);
                }
            }
        }
    });
}

fn spawn_flush_task(store: Store) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(FLUSH_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = store.flush() {
                error!("failed to flush store: {e}");
            }
        }
    });
}

fn spawn_checkpoint_task(store: Store) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CHECKPOINT_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = store.checkpoint_and_truncate() {
                warn!("periodic checkpoint failed: {e}");
            }
        }
    });
}

/// Acquires the daemon's single-instance lock, grounded on the teacher's
/// `lifecycle::startup_inner`: hold the lock before writing the pid so a
/// racing second instance sees `try_lock_exclusive` fail rather than a
/// half-written pid file.
fn acquire_lock(config: &Config) -> Result<std::fs::File, StartupError> {
    let lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&config.lock_path)?;
    lock_file
        .try_lock_exclusive()
        .map_err(|_| StartupError::LockHeld(config.lock_path.clone()))?;

    let mut lock_file = lock_file;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;
    std::fs::write(
        &config.version_path,
        concat!(env!("CARGO_PKG_VERSION"), "+", env!("BUILD_GIT_HASH")),
    )?;
    Ok(lock_file)
}

fn cleanup(config: &Config) {
    let _ = std::fs::remove_file(&config.socket_path);
    let _ = std::fs::remove_file(&config.lock_path);
    let _ = std::fs::remove_file(&config.version_path);
}

const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;
const MAX_ROTATED_LOGS: u32 = 3;

/// Rotates `daemon.log` -> `.1` -> `.2` -> `.3`, discarding the oldest.
/// Best-effort: rotation failures are silently ignored so the daemon still
/// starts.
fn rotate_log_if_needed(log_path: &std::path::Path) {
    let size = match std::fs::metadata(log_path) {
        Ok(m) => m.len(),
        Err(_) => return,
    };
    if size < MAX_LOG_SIZE {
        return;
    }
    let log_str = log_path.display().to_string();
    for i in (1..MAX_ROTATED_LOGS).rev() {
        let from = format!("{log_str}.{i}");
        let to = format!("{log_str}.{}", i + 1);
        let _ = std::fs::rename(&from, &to);
    }
    let _ = std::fs::rename(log_path, format!("{log_str}.1"));
}

const STARTUP_MARKER_PREFIX: &str = "--- tfd: starting (pid: ";

fn write_startup_marker(config: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = config.log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_path)?;
    writeln!(
        file,
        "{}{}) ---\n",
        STARTUP_MARKER_PREFIX,
        std::process::id()
    )?;
    Ok(())
}

fn write_startup_error(config: &Config, error: &dyn std::error::Error) {
    let Ok(mut file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_path)
    else {
        return;
    };
    let _ = writeln!(file, "ERROR Failed to start daemon: {error}");
}

fn setup_logging(
    config: &Config,
) -> Result<tracing_appender::non_blocking::WorkerGuard, ConfigError> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    if let Some(parent) = config.log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file_appender = tracing_appender::rolling::never(
        config.log_path.parent().ok_or(ConfigError::NoStateDir)?,
        config.log_path.file_name().ok_or(ConfigError::NoStateDir)?,
    );
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_filter()));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    Ok(guard)
}

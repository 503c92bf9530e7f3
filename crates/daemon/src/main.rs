// SPDX-License-Identifier: MIT

//! relayd - the relay bridge daemon.
//!
//! Owns the store, the worker pool, and the Telegram polling loop.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use relay_adapters::ProcessRunner;
use relay_chat::{ChatCommandHandler, HandlerConfig, RunStreamer, StreamerConfig};
use relay_core::{SystemClock, UuidIdGen};
use relay_daemon::{config::Config, dispatch, lifecycle, projects, telegram::TelegramTransport};
use relay_engine::{
    CliExecutor, ExecutorConfig, PrefsRegistry, RunOrchestrator, WorkerConfig, WorkerPool,
};
use relay_storage::{Checkpointer, Store};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;
use tracing::{error, info, warn};

/// WAL group-commit flush window.
const FLUSH_INTERVAL: Duration = Duration::from_millis(10);

/// Snapshot checkpoint interval.
const CHECKPOINT_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "--version" | "-V" | "-v" => {
                println!("relayd {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" | "help" => {
                println!("relayd {}", env!("CARGO_PKG_VERSION"));
                println!("Telegram remote-control bridge for coding-agent CLIs.");
                println!();
                println!("Configuration is environment-driven: TELEGRAM_BOT_TOKEN,");
                println!("TELEGRAM_OWNER_USER_ID, DATA_DIR, PROJECTS_CONFIG_PATH, ...");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help       Print help information");
                println!("    -v, --version    Print version information");
                return Ok(());
            }
            other => {
                eprintln!("error: unexpected argument '{other}'");
                eprintln!("Usage: relayd [--help | --version]");
                std::process::exit(1);
            }
        }
    }

    let config = Config::from_env()?;
    std::fs::create_dir_all(&config.data_dir)?;

    lifecycle::rotate_log_if_needed(&config.log_path());
    let _log_guard = setup_logging(&config)?;

    let _lock = match lifecycle::LockFile::acquire(&config.lock_path()) {
        Ok(lock) => lock,
        Err(e) => {
            eprintln!("relayd is already running ({e})");
            std::process::exit(1);
        }
    };

    info!("starting relayd");

    let store = Arc::new(Store::open(&config.data_dir)?);

    // Config reload: delete projects absent from the file, upsert the rest.
    match projects::load(&config.projects_config_path) {
        Ok(projects) => {
            let count = projects.len();
            store.reload_projects(&projects)?;
            info!(count, "projects loaded");
        }
        Err(e) => warn!(error = %e, "projects file not loaded; continuing with stored projects"),
    }

    let transport = TelegramTransport::new(&config.telegram_bot_token)?;
    let clock = SystemClock;
    let runner = ProcessRunner::new();
    let prefs = PrefsRegistry::new();

    let streamer = Arc::new(RunStreamer::new(
        transport.clone(),
        clock.clone(),
        StreamerConfig::default(),
    ));
    let executor = Arc::new(CliExecutor::new(
        Arc::clone(&store),
        runner.clone(),
        clock.clone(),
        prefs.clone(),
        ExecutorConfig::default(),
    ));
    let orchestrator = Arc::new(
        RunOrchestrator::new(
            Arc::clone(&store),
            clock.clone(),
            UuidIdGen,
            executor,
            streamer,
        )
        .with_kill_switch(config.kill_switch_disable_runs),
    );
    let handler = Arc::new(ChatCommandHandler::new(
        Arc::clone(&store),
        Arc::clone(&orchestrator) as Arc<dyn relay_engine::RunService>,
        clock.clone(),
        UuidIdGen,
        prefs,
        HandlerConfig {
            owner_user_id: config.owner_user_id,
            kill_switch_disable_runs: config.kill_switch_disable_runs,
            projects_config_path: Some(config.projects_config_path.clone()),
        },
    ));
    let pool = Arc::new(WorkerPool::new(
        Arc::clone(&orchestrator),
        Arc::clone(&store),
        runner,
        clock,
        WorkerConfig::default(),
    ));

    spawn_flush_task(Arc::clone(&store));
    spawn_checkpoint_task(Arc::clone(&store), &config);

    // One Notify per loop: notify_one stores a permit, so a shutdown
    // signal cannot be lost to a loop that is mid-iteration.
    let pool_shutdown = Arc::new(Notify::new());
    let poll_shutdown = Arc::new(Notify::new());
    let pool_task = tokio::spawn(Arc::clone(&pool).run(Arc::clone(&pool_shutdown)));
    let poll_task = tokio::spawn(poll_updates(
        transport.clone(),
        Arc::clone(&handler),
        Arc::clone(&poll_shutdown),
    ));

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    info!("relayd ready");

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
    }

    // Wake both loops, wait for the pool to drain its workers.
    pool_shutdown.notify_one();
    poll_shutdown.notify_one();
    if let Err(e) = pool_task.await {
        error!(error = %e, "worker pool task failed");
    }
    poll_task.abort();
    if let Err(e) = store.flush() {
        error!(error = %e, "final WAL flush failed");
    }
    info!("relayd stopped");
    Ok(())
}

/// Long-poll loop: fetch updates, run them through the handler, perform
/// the resulting actions.
async fn poll_updates(
    transport: TelegramTransport,
    handler: Arc<ChatCommandHandler<SystemClock, UuidIdGen>>,
    shutdown: Arc<Notify>,
) {
    let mut offset = 0i64;
    loop {
        let updates = tokio::select! {
            _ = shutdown.notified() => return,
            result = transport.get_updates(offset) => result,
        };
        let updates = match updates {
            Ok(updates) => updates,
            Err(e) => {
                warn!(error = %e, "getUpdates failed, backing off");
                tokio::time::sleep(Duration::from_secs(3)).await;
                continue;
            }
        };
        for update in updates {
            offset = offset.max(update.update_id + 1);
            let Some(chat_id) = update.chat_id() else {
                continue;
            };
            let actions = handler.handle_update(update).await;
            dispatch::perform(&transport, chat_id, actions).await;
        }
    }
}

fn spawn_flush_task(store: Arc<Store>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(FLUSH_INTERVAL);
        loop {
            interval.tick().await;
            if store.needs_flush() {
                if let Err(e) = store.flush() {
                    error!(error = %e, "WAL flush failed");
                }
            }
        }
    });
}

/// Periodic snapshot + WAL truncation. The snapshot must be durable
/// before the WAL entries it covers are dropped.
fn spawn_checkpoint_task(store: Arc<Store>, config: &Config) {
    let checkpointer = Checkpointer::new(config.data_dir.join(Store::SNAPSHOT_FILE));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CHECKPOINT_INTERVAL);
        loop {
            interval.tick().await;
            let (seq, state) = match store.checkpoint_begin() {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(error = %e, "checkpoint begin failed");
                    continue;
                }
            };
            if seq == 0 {
                continue;
            }
            let checkpointer_ref = &checkpointer;
            let result =
                tokio::task::block_in_place(|| checkpointer_ref.checkpoint(seq, state));
            match result {
                Ok(size_bytes) => {
                    tracing::debug!(seq, size_bytes, "checkpoint complete");
                    if let Err(e) = store.truncate_wal(seq) {
                        warn!(error = %e, "WAL truncation failed after checkpoint");
                    }
                }
                Err(e) => warn!(error = %e, "checkpoint failed, WAL kept"),
            }
        }
    });
}

fn setup_logging(
    config: &Config,
) -> Result<tracing_appender::non_blocking::WorkerGuard, Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let log_path = config.log_path();
    let directory = log_path
        .parent()
        .map(std::path::Path::to_path_buf)
        .unwrap_or_else(|| std::path::PathBuf::from("."));
    std::fs::create_dir_all(&directory)?;
    let file_name = log_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "relayd.log".to_string());

    let file_appender = tracing_appender::rolling::never(directory, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    Ok(guard)
}

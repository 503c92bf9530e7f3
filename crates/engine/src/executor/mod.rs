// SPDX-License-Identifier: MIT

//! CLI executors: drive one engine process per run.
//!
//! The two engines differ in argv construction, permission policy,
//! parser, and idle timeout; the run loop is shared. Cancellation is
//! observed by polling the store every 500 ms rather than threading a
//! token through the call stack, and an idle watchdog cancels runs
//! whose streams go quiet for too long.

pub mod claude;
pub mod opencode;

pub use claude::ClaudeOptions;
pub use opencode::OpenCodeOptions;

use crate::error::ExecuteError;
use crate::orchestrator::{ExecutionContext, ExecutionReport, RunEventObserver, RunExecutor};
use async_trait::async_trait;
use parking_lot::Mutex;
use relay_adapters::env::sanitize_env;
use relay_adapters::{
    ChunkSink, ClaudeParser, EngineParser, OpenCodeParser, ProcessRunner, StartConfig,
};
use relay_core::{Clock, EngineEvent, EngineKind, RunOutcome, RunStatus};
use relay_storage::Store;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cap on the retained stderr tail.
const STDERR_CAP: usize = 10 * 1024;

/// Per-chat engine preferences, set from the chat surface and read at
/// execution start.
#[derive(Debug, Clone, Default)]
pub struct EnginePrefs {
    pub model: Option<String>,
    pub opencode_agent: Option<String>,
}

/// Shared registry of per-chat preferences (process-local; the chat
/// handler writes, executors read).
#[derive(Clone, Default)]
pub struct PrefsRegistry {
    inner: Arc<Mutex<HashMap<i64, EnginePrefs>>>,
}

impl PrefsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, chat_external_id: i64, prefs: EnginePrefs) {
        self.inner.lock().insert(chat_external_id, prefs);
    }

    pub fn get(&self, chat_external_id: i64) -> EnginePrefs {
        self.inner
            .lock()
            .get(&chat_external_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn update<F: FnOnce(&mut EnginePrefs)>(&self, chat_external_id: i64, update: F) {
        let mut inner = self.inner.lock();
        update(inner.entry(chat_external_id).or_default());
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub claude_binary: String,
    pub opencode_binary: String,
    /// Idle watchdog thresholds. The asymmetry (opencode slower to
    /// first byte) is deliberate.
    pub claude_idle_timeout: Duration,
    pub opencode_idle_timeout: Duration,
    pub cancel_poll_interval: Duration,
    pub cancel_grace: Duration,
    pub claude_options: ClaudeOptions,
    pub opencode_options: OpenCodeOptions,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            claude_binary: "claude".to_string(),
            opencode_binary: "opencode".to_string(),
            claude_idle_timeout: Duration::from_secs(180),
            opencode_idle_timeout: Duration::from_secs(300),
            cancel_poll_interval: Duration::from_millis(500),
            cancel_grace: Duration::from_millis(1000),
            claude_options: ClaudeOptions::default(),
            opencode_options: OpenCodeOptions::default(),
        }
    }
}

/// Drives claude and opencode runs through the process runner.
pub struct CliExecutor<C: Clock> {
    store: Arc<Store>,
    runner: ProcessRunner,
    clock: C,
    prefs: PrefsRegistry,
    config: ExecutorConfig,
}

impl<C: Clock> CliExecutor<C> {
    pub fn new(
        store: Arc<Store>,
        runner: ProcessRunner,
        clock: C,
        prefs: PrefsRegistry,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            store,
            runner,
            clock,
            prefs,
            config,
        }
    }

    fn invocation(
        &self,
        ctx: &ExecutionContext,
        prefs: &EnginePrefs,
        unsafe_mode: bool,
    ) -> (String, Vec<String>, Vec<(String, String)>, Duration) {
        match ctx.provider {
            EngineKind::Claude => {
                let args = claude::build_args(
                    &ctx.prompt,
                    &ctx.session,
                    prefs.model.as_deref(),
                    unsafe_mode,
                    &self.config.claude_options,
                );
                (
                    self.config.claude_binary.clone(),
                    args,
                    Vec::new(),
                    self.config.claude_idle_timeout,
                )
            }
            EngineKind::OpenCode => {
                let mut options = self.config.opencode_options.clone();
                if prefs.opencode_agent.is_some() {
                    options.agent = prefs.opencode_agent.clone();
                }
                let args = opencode::build_args(
                    &ctx.prompt,
                    &ctx.session,
                    prefs.model.as_deref(),
                    ctx.project.opencode_attach_url.as_deref(),
                    &[],
                    &options,
                );
                let env = vec![(
                    opencode::CONFIG_ENV.to_string(),
                    opencode::permission_config(unsafe_mode),
                )];
                (
                    self.config.opencode_binary.clone(),
                    args,
                    env,
                    self.config.opencode_idle_timeout,
                )
            }
        }
    }

    fn new_parser(&self, provider: EngineKind) -> Box<dyn EngineParser> {
        match provider {
            EngineKind::Claude => Box::new(ClaudeParser::new()),
            EngineKind::OpenCode => Box::new(OpenCodeParser::new()),
        }
    }
}

#[async_trait]
impl<C: Clock> RunExecutor for CliExecutor<C> {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        observer: Arc<dyn RunEventObserver>,
    ) -> Result<ExecutionReport, ExecuteError> {
        let now = self.clock.epoch_ms();
        observer
            .on_event(EngineEvent::RunStarted {
                run_id: Some(ctx.run_id.to_string()),
                timestamp: Some(now),
            })
            .await?;

        // Unsafe mode is decided at execution start, not enqueue time.
        let unsafe_mode = ctx
            .chat_external_id
            .and_then(|id| self.store.get_chat_by_external(id))
            .map(|chat| chat.unsafe_active(now))
            .unwrap_or(false);
        let prefs = ctx
            .chat_external_id
            .map(|id| self.prefs.get(id))
            .unwrap_or_default();

        let (command, args, extra_env, idle_timeout) = self.invocation(ctx, &prefs, unsafe_mode);
        let mut env = sanitize_env(std::env::vars().collect());
        env.extend(extra_env);

        let shared = StreamShared {
            observer: Arc::clone(&observer),
            activity: Arc::new(Mutex::new(Instant::now())),
            error_seen: Arc::new(AtomicBool::new(false)),
            persist_failure: Arc::new(Mutex::new(None)),
        };
        let parser = Arc::new(tokio::sync::Mutex::new(self.new_parser(ctx.provider)));
        let bytes_out = Arc::new(AtomicU64::new(0));
        let stderr_tail = Arc::new(Mutex::new(Vec::new()));

        let mut config = StartConfig::new(ctx.session.id.as_str(), command);
        config.args = args;
        config.cwd = ctx.project.root_path.clone();
        config.env = env;
        config.cancel_grace = self.config.cancel_grace;

        let handle = self
            .runner
            .start(
                config,
                StdoutSink {
                    shared: shared.clone(),
                    parser: Arc::clone(&parser),
                    bytes_out: Arc::clone(&bytes_out),
                },
                StderrSink {
                    shared: shared.clone(),
                    tail: Arc::clone(&stderr_tail),
                },
                None,
            )
            .await?;

        // Idle watchdog: cancel when both streams go quiet.
        let idle_fired = Arc::new(AtomicBool::new(false));
        let watchdog = {
            let activity = Arc::clone(&shared.activity);
            let canceller = handle.canceller();
            let idle_fired = Arc::clone(&idle_fired);
            let run_id = ctx.run_id.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    if activity.lock().elapsed() >= idle_timeout {
                        tracing::warn!(%run_id, ?idle_timeout, "idle timeout, cancelling run");
                        idle_fired.store(true, Ordering::SeqCst);
                        canceller.cancel();
                        break;
                    }
                }
            })
        };

        // Poll for store-side cancellation (the /stop path).
        let cancel_poll = {
            let store = Arc::clone(&self.store);
            let canceller = handle.canceller();
            let run_id = ctx.run_id.clone();
            let interval = self.config.cancel_poll_interval;
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(interval).await;
                    let cancelled = store
                        .get_run(&run_id)
                        .is_some_and(|run| run.status == RunStatus::Cancelled);
                    if cancelled {
                        tracing::info!(%run_id, "run cancelled in store, stopping process");
                        canceller.cancel();
                        break;
                    }
                }
            })
        };

        let result = handle.wait().await;
        watchdog.abort();
        cancel_poll.abort();
        let result = result?;

        let mut exit_status = match result.status {
            relay_adapters::ProcessStatus::Completed => RunOutcome::Success,
            relay_adapters::ProcessStatus::Cancelled => RunOutcome::Cancelled,
            relay_adapters::ProcessStatus::Failed => RunOutcome::Error,
        };
        // An idle-timeout cancel is a failure, not a user cancel.
        if idle_fired.load(Ordering::SeqCst) {
            exit_status = RunOutcome::Error;
        }

        // Flush parser residue. The terminal event is held back so a
        // synthesized stderr error can precede it.
        let (terminals, engine_session_id, malformed) = {
            let mut parser = parser.lock().await;
            let (terminals, residue): (Vec<_>, Vec<_>) = parser
                .finish(exit_status)
                .into_iter()
                .partition(EngineEvent::is_terminal);
            for event in residue {
                shared.forward(event).await;
            }
            (
                terminals,
                parser.engine_session_id().map(String::from),
                parser.malformed_lines(),
            )
        };
        if malformed > 0 {
            tracing::warn!(run_id = %ctx.run_id, malformed, "engine emitted malformed lines");
        }

        // A failed run with no error event gets one from the stderr tail.
        if exit_status == RunOutcome::Error && !shared.error_seen.load(Ordering::SeqCst) {
            let tail = String::from_utf8_lossy(&stderr_tail.lock()).trim().to_string();
            let message = if tail.is_empty() {
                match result.exit_code {
                    Some(code) => format!("engine exited with code {code}"),
                    None => "engine exited unexpectedly".to_string(),
                }
            } else {
                tail
            };
            shared
                .forward(EngineEvent::Error {
                    message,
                    code: None,
                })
                .await;
        }
        for event in terminals {
            shared.forward(event).await;
        }

        if let Some(failure) = shared.persist_failure.lock().take() {
            return Err(failure);
        }

        // Persist a newly captured engine session id.
        if let Some(id) = &engine_session_id {
            if ctx.session.engine_session_id.as_deref() != Some(id) {
                self.store
                    .set_engine_session_id(&ctx.session.id, Some(id.clone()))?;
            }
        }

        Ok(ExecutionReport {
            exit_status,
            engine_session_id,
            bytes_in: ctx.prompt.len() as u64,
            bytes_out: Some(bytes_out.load(Ordering::SeqCst)),
            events_persisted: true,
            events: Vec::new(),
        })
    }
}

/// State shared by both stream sinks and the post-exit path.
#[derive(Clone)]
struct StreamShared {
    observer: Arc<dyn RunEventObserver>,
    activity: Arc<Mutex<Instant>>,
    error_seen: Arc<AtomicBool>,
    persist_failure: Arc<Mutex<Option<ExecuteError>>>,
}

impl StreamShared {
    fn touch(&self) {
        *self.activity.lock() = Instant::now();
    }

    /// Forward one event to the observer, remembering the first
    /// persistence failure instead of losing the stream.
    async fn forward(&self, event: EngineEvent) {
        if matches!(event, EngineEvent::Error { .. }) {
            self.error_seen.store(true, Ordering::SeqCst);
        }
        if self.persist_failure.lock().is_some() {
            return;
        }
        if let Err(e) = self.observer.on_event(event).await {
            tracing::error!(error = %e, "failed to persist run event");
            self.persist_failure.lock().get_or_insert(e);
        }
    }
}

struct StdoutSink {
    shared: StreamShared,
    parser: Arc<tokio::sync::Mutex<Box<dyn EngineParser>>>,
    bytes_out: Arc<AtomicU64>,
}

#[async_trait]
impl ChunkSink for StdoutSink {
    async fn on_chunk(&mut self, chunk: &[u8]) {
        self.shared.touch();
        self.bytes_out.fetch_add(chunk.len() as u64, Ordering::SeqCst);
        let events = self.parser.lock().await.push(chunk);
        for event in events {
            self.shared.forward(event).await;
        }
    }
}

struct StderrSink {
    shared: StreamShared,
    tail: Arc<Mutex<Vec<u8>>>,
}

#[async_trait]
impl ChunkSink for StderrSink {
    async fn on_chunk(&mut self, chunk: &[u8]) {
        self.shared.touch();
        let mut tail = self.tail.lock();
        tail.extend_from_slice(chunk);
        if tail.len() > STDERR_CAP {
            let excess = tail.len() - STDERR_CAP;
            tail.drain(..excess);
        }
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;

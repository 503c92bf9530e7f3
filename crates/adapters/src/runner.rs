// SPDX-License-Identifier: MIT

//! Child process runner.
//!
//! Spawns an engine CLI, delivers stdout/stderr with back-pressure
//! (the next read is not issued until the sink's async callback
//! resolves), and enforces two policies:
//!
//! - **single-flight**: one live process per session key;
//! - **cancel escalation**: first `cancel()` sends SIGINT, and the
//!   process is force-killed after the grace period if it ignores it.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, Notify};

/// Default grace between interrupt and force-kill.
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_millis(1000);

/// Read buffer size for stdout/stderr.
const READ_BUF: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("session already has a live process: {0}")]
    SingleFlightSession(String),
    #[error("spawn failed: {0}")]
    Spawn(String),
    #[error("process supervisor dropped: {0}")]
    Supervisor(String),
}

/// Consumer of one output stream. Called per chunk; the stream stays
/// paused until the returned future resolves.
#[async_trait]
pub trait ChunkSink: Send + 'static {
    async fn on_chunk(&mut self, chunk: &[u8]);
}

/// Sink that discards everything.
pub struct NullSink;

#[async_trait]
impl ChunkSink for NullSink {
    async fn on_chunk(&mut self, _chunk: &[u8]) {}
}

/// Ordered lifecycle notifications for one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Starting,
    Running { pid: u32 },
    Cancelling,
    Killing,
    Exited {
        exit_code: Option<i32>,
        signal: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Terminal result of a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    pub status: ProcessStatus,
    pub exit_code: Option<i32>,
    /// Name of the terminating signal, when killed by one.
    pub signal: Option<String>,
    /// True iff `cancel()` was invoked on the handle.
    pub cancelled: bool,
}

/// Spawn parameters.
pub struct StartConfig {
    /// Single-flight key; usually the session id.
    pub session_key: String,
    pub command: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub cancel_grace: Duration,
}

impl StartConfig {
    pub fn new(session_key: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            session_key: session_key.into(),
            command: command.into(),
            args: Vec::new(),
            cwd: PathBuf::from("."),
            env: Vec::new(),
            cancel_grace: DEFAULT_CANCEL_GRACE,
        }
    }
}

/// Cloneable cancel trigger shared with watchdogs and poll loops.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelHandle {
    fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Request cancellation. First call wins; later calls are no-ops.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            self.notify.notify_one();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Handle to a live process.
#[derive(Debug)]
pub struct ProcessHandle {
    pub pid: u32,
    cancel: CancelHandle,
    result_rx: oneshot::Receiver<ProcessResult>,
}

impl ProcessHandle {
    /// Request graceful-then-forceful termination.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A cloneable trigger for cancellation from other tasks.
    pub fn canceller(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Wait for the terminal result.
    pub async fn wait(self) -> Result<ProcessResult, RunnerError> {
        self.result_rx
            .await
            .map_err(|e| RunnerError::Supervisor(e.to_string()))
    }
}

/// Spawner with per-session-key single-flight.
#[derive(Clone, Default)]
pub struct ProcessRunner {
    active: Arc<Mutex<HashMap<String, CancelHandle>>>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live processes.
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Cancel every live process (graceful shutdown path).
    pub fn cancel_all(&self) {
        let handles: Vec<CancelHandle> = self.active.lock().values().cloned().collect();
        for handle in handles {
            handle.cancel();
        }
    }

    /// Spawn a process. Fails fast with [`RunnerError::SingleFlightSession`]
    /// when the session key already has a live process; the slot is freed
    /// on every exit path, including spawn failure.
    pub async fn start<O, E>(
        &self,
        config: StartConfig,
        stdout_sink: O,
        stderr_sink: E,
        lifecycle: Option<mpsc::Sender<LifecycleEvent>>,
    ) -> Result<ProcessHandle, RunnerError>
    where
        O: ChunkSink,
        E: ChunkSink,
    {
        let cancel = CancelHandle::new();
        {
            let mut active = self.active.lock();
            if active.contains_key(&config.session_key) {
                return Err(RunnerError::SingleFlightSession(config.session_key));
            }
            active.insert(config.session_key.clone(), cancel.clone());
        }

        emit(&lifecycle, LifecycleEvent::Starting).await;

        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .current_dir(&config.cwd)
            .env_clear()
            .envs(config.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.active.lock().remove(&config.session_key);
                return Err(RunnerError::Spawn(format!(
                    "{}: {e}",
                    config.command
                )));
            }
        };

        let pid = child.id().unwrap_or_default();
        emit(&lifecycle, LifecycleEvent::Running { pid }).await;
        tracing::debug!(pid, session_key = %config.session_key, command = %config.command, "process running");

        let stdout_task = child
            .stdout
            .take()
            .map(|stream| tokio::spawn(pump(stream, stdout_sink)));
        let stderr_task = child
            .stderr
            .take()
            .map(|stream| tokio::spawn(pump(stream, stderr_sink)));

        let (result_tx, result_rx) = oneshot::channel();
        let supervisor = Supervisor {
            session_key: config.session_key.clone(),
            cancel_grace: config.cancel_grace,
            cancel: cancel.clone(),
            active: Arc::clone(&self.active),
            lifecycle,
        };
        tokio::spawn(async move {
            let result = supervisor
                .run(child, pid, stdout_task, stderr_task)
                .await;
            let _ = result_tx.send(result);
        });

        Ok(ProcessHandle {
            pid,
            cancel,
            result_rx,
        })
    }
}

struct Supervisor {
    session_key: String,
    cancel_grace: Duration,
    cancel: CancelHandle,
    active: Arc<Mutex<HashMap<String, CancelHandle>>>,
    lifecycle: Option<mpsc::Sender<LifecycleEvent>>,
}

impl Supervisor {
    async fn run(
        self,
        mut child: tokio::process::Child,
        pid: u32,
        stdout_task: Option<tokio::task::JoinHandle<()>>,
        stderr_task: Option<tokio::task::JoinHandle<()>>,
    ) -> ProcessResult {
        let mut forced = false;

        let status = tokio::select! {
            status = child.wait() => status,
            _ = self.cancel.notify.notified() => {
                emit(&self.lifecycle, LifecycleEvent::Cancelling).await;
                interrupt(pid);
                match tokio::time::timeout(self.cancel_grace, child.wait()).await {
                    Ok(status) => status,
                    Err(_) => {
                        emit(&self.lifecycle, LifecycleEvent::Killing).await;
                        forced = true;
                        let _ = child.start_kill();
                        child.wait().await
                    }
                }
            }
        };

        // Drain the streams so every chunk is delivered before the
        // result resolves.
        if let Some(task) = stdout_task {
            let _ = task.await;
        }
        if let Some(task) = stderr_task {
            let _ = task.await;
        }

        self.active.lock().remove(&self.session_key);

        let cancelled = self.cancel.is_cancelled();
        let (exit_code, signal) = match &status {
            Ok(status) => (status.code(), signal_name(status, forced)),
            Err(_) => (None, None),
        };
        emit(
            &self.lifecycle,
            LifecycleEvent::Exited {
                exit_code,
                signal: signal.clone(),
            },
        )
        .await;

        let process_status = if cancelled {
            ProcessStatus::Cancelled
        } else if exit_code == Some(0) {
            ProcessStatus::Completed
        } else {
            ProcessStatus::Failed
        };

        tracing::debug!(
            pid,
            session_key = %self.session_key,
            ?exit_code,
            ?signal,
            cancelled,
            "process exited"
        );

        ProcessResult {
            status: process_status,
            exit_code,
            signal,
            cancelled,
        }
    }
}

async fn emit(lifecycle: &Option<mpsc::Sender<LifecycleEvent>>, event: LifecycleEvent) {
    if let Some(tx) = lifecycle {
        let _ = tx.send(event).await;
    }
}

/// Read loop for one stream: deliver each chunk and wait for the sink
/// before reading further (back-pressure).
async fn pump<R, S>(mut stream: R, mut sink: S)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    S: ChunkSink,
{
    let mut buf = [0u8; READ_BUF];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => sink.on_chunk(&buf[..n]).await,
        }
    }
}

/// Deliver SIGINT (the graceful half of cancellation).
#[cfg(unix)]
fn interrupt(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
        tracing::warn!(pid, error = %e, "failed to interrupt process");
    }
}

#[cfg(not(unix))]
fn interrupt(_pid: u32) {
    // No interrupt equivalent; the grace timeout escalates to kill.
}

#[cfg(unix)]
fn signal_name(status: &std::process::ExitStatus, forced: bool) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;
    match status.signal() {
        Some(2) => Some("SIGINT".to_string()),
        Some(9) => Some("SIGKILL".to_string()),
        Some(15) => Some("SIGTERM".to_string()),
        Some(n) => Some(format!("SIG{n}")),
        // start_kill can race a normal exit; report what we did.
        None if forced => Some("SIGKILL".to_string()),
        None => None,
    }
}

#[cfg(not(unix))]
fn signal_name(_status: &std::process::ExitStatus, forced: bool) -> Option<String> {
    forced.then(|| "SIGKILL".to_string())
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;

// SPDX-License-Identifier: MIT

//! Run orchestration: idempotent enqueue, leased processing, stale-run
//! reconciliation.
//!
//! Truth lives in the store; the in-memory `active_sessions` set is a
//! process-local guard that closes the window between leasing a job and
//! the store reflecting its in-flight run.

use crate::error::{ExecuteError, OrchestratorError};
use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::{
    Clock, EngineEvent, EngineKind, IdGen, Job, Project, Run, RunId, RunOutcome, RunStatus,
    RunSummary, Session, SessionId,
};
use relay_storage::Store;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Enqueue parameters.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub project_id: relay_core::ProjectId,
    pub session_id: SessionId,
    pub idempotency_key: String,
    pub prompt: String,
}

/// What an executor hands back after driving one run.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub exit_status: RunOutcome,
    pub engine_session_id: Option<String>,
    pub bytes_in: u64,
    /// When absent, the orchestrator falls back to the encoded length
    /// of the persisted events.
    pub bytes_out: Option<u64>,
    /// True when the executor already pushed every event through the
    /// observer; otherwise `events` carries them for the orchestrator
    /// to persist.
    pub events_persisted: bool,
    pub events: Vec<EngineEvent>,
}

/// Everything an executor needs to drive one run.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub run_id: RunId,
    pub project: Project,
    pub session: Session,
    pub provider: EngineKind,
    pub prompt: String,
    /// External chat id bound to the session, when there is one.
    pub chat_external_id: Option<i64>,
}

/// Persist-and-forward path for events produced during a run.
#[async_trait]
pub trait RunEventObserver: Send + Sync {
    async fn on_event(&self, event: EngineEvent) -> Result<(), ExecuteError>;
}

/// Executes one run, streaming events through the observer.
#[async_trait]
pub trait RunExecutor: Send + Sync + 'static {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        observer: Arc<dyn RunEventObserver>,
    ) -> Result<ExecutionReport, ExecuteError>;
}

/// Terminal notification data for consumers.
#[derive(Debug, Clone)]
pub struct RunFinish {
    pub status: RunOutcome,
    pub duration_ms: u64,
    pub engine_session_id: Option<String>,
}

/// Downstream consumer of run events (the chat streamer in production).
/// Failures must be swallowed by the implementation; the run does not
/// depend on the chat surface.
#[async_trait]
pub trait EventSink: Send + Sync + 'static {
    async fn on_event(&self, chat_id: Option<i64>, run_id: &RunId, event: &EngineEvent);
    async fn on_finished(&self, chat_id: Option<i64>, run_id: &RunId, finish: &RunFinish);
}

/// Sink that drops everything.
pub struct NullEventSink;

#[async_trait]
impl EventSink for NullEventSink {
    async fn on_event(&self, _chat_id: Option<i64>, _run_id: &RunId, _event: &EngineEvent) {}
    async fn on_finished(&self, _chat_id: Option<i64>, _run_id: &RunId, _finish: &RunFinish) {}
}

/// Result of a reconcile sweep over stale in-flight runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileOutcome {
    pub abandoned_run_ids: Vec<RunId>,
    pub requeued: usize,
}

/// The narrow enqueue surface exposed to the chat handler.
#[async_trait]
pub trait RunService: Send + Sync + 'static {
    async fn enqueue(&self, req: EnqueueRequest) -> Result<Run, OrchestratorError>;
}

pub struct RunOrchestrator<C: Clock, G: IdGen> {
    store: Arc<Store>,
    clock: C,
    ids: G,
    executor: Arc<dyn RunExecutor>,
    sink: Arc<dyn EventSink>,
    active_sessions: Arc<Mutex<HashSet<String>>>,
    kill_switch: bool,
}

impl<C: Clock, G: IdGen> RunOrchestrator<C, G> {
    pub fn new(
        store: Arc<Store>,
        clock: C,
        ids: G,
        executor: Arc<dyn RunExecutor>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            clock,
            ids,
            executor,
            sink,
            active_sessions: Arc::new(Mutex::new(HashSet::new())),
            kill_switch: false,
        }
    }

    /// Refuse to execute leased jobs while the kill switch is on.
    pub fn with_kill_switch(mut self, enabled: bool) -> Self {
        self.kill_switch = enabled;
        self
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Idempotent enqueue: the same key returns the original run, and a
    /// session may hold at most one active run.
    pub fn enqueue_run(&self, req: EnqueueRequest) -> Result<Run, OrchestratorError> {
        if let Some(existing) = self.store.get_run_by_idempotency_key(&req.idempotency_key) {
            return Ok(existing);
        }

        // Process-local guard; the store re-checks single-flight against
        // persisted runs atomically with the insert.
        if self
            .active_sessions
            .lock()
            .contains(req.session_id.as_str())
        {
            return Err(OrchestratorError::SessionAlreadyActive(req.session_id));
        }

        let now = self.clock.epoch_ms();
        let run = Run {
            id: RunId::new(self.ids.next()),
            project_id: req.project_id,
            session_id: req.session_id,
            idempotency_key: req.idempotency_key.clone(),
            prompt: req.prompt,
            status: RunStatus::Queued,
            created_at: now,
            started_at: None,
            finished_at: None,
            summary: None,
        };
        let job = Job {
            id: self.ids.next(),
            run_id: run.id.clone(),
            status: relay_core::JobStatus::Queued,
            lease_owner: None,
            lease_expires_at: None,
            available_at: now,
            attempts: 0,
            last_error: None,
        };

        match self.store.enqueue_run(run.clone(), job) {
            Ok(()) => Ok(run),
            // Raced with a concurrent enqueue on the same key.
            Err(relay_storage::StoreError::DuplicateIdempotencyKey(existing)) => self
                .store
                .get_run(&existing)
                .ok_or(OrchestratorError::Store(
                    relay_storage::StoreError::NotFound {
                        kind: "run",
                        id: existing.to_string(),
                    },
                )),
            Err(relay_storage::StoreError::SessionActive(session_id)) => {
                Err(OrchestratorError::SessionAlreadyActive(session_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Lease the next available job, if any.
    pub fn lease_next(
        &self,
        owner: &str,
        lease_duration_ms: u64,
    ) -> Result<Option<Job>, OrchestratorError> {
        Ok(self
            .store
            .lease_next_job(owner, self.clock.epoch_ms(), lease_duration_ms)?)
    }

    /// Lease and execute one job. Returns the run id it worked on, or
    /// `None` when the queue was empty or the job was requeued.
    pub async fn process(
        &self,
        owner: &str,
        lease_duration_ms: u64,
    ) -> Result<Option<RunId>, OrchestratorError> {
        match self.lease_next(owner, lease_duration_ms)? {
            Some(job) => self.process_job(job).await,
            None => Ok(None),
        }
    }

    /// Execute a leased job to completion.
    pub async fn process_job(&self, job: Job) -> Result<Option<RunId>, OrchestratorError> {
        let now = self.clock.epoch_ms();

        if self.kill_switch {
            tracing::warn!(job_id = %job.id, "kill switch on, refusing leased job");
            self.store.fail_job(&job.id, "kill-switch")?;
            self.store
                .finalize_run(&job.run_id, RunStatus::Failed, now, None)?;
            return Ok(None);
        }

        let Some(run) = self.store.get_run(&job.run_id) else {
            self.store.fail_job(&job.id, "run not found")?;
            return Ok(None);
        };

        // Re-lease collision with a run this process is already driving.
        if self
            .active_sessions
            .lock()
            .contains(run.session_id.as_str())
        {
            self.store.requeue_leased_job_by_run_id(&run.id, now)?;
            return Ok(None);
        }

        let Some(session) = self.store.get_session(&run.session_id) else {
            let message = format!("session not found: {}", run.session_id);
            self.store.fail_job(&job.id, &message)?;
            self.store.finalize_run(
                &run.id,
                RunStatus::Failed,
                now,
                Some(minimal_summary(RunOutcome::Error)),
            )?;
            return Ok(None);
        };
        let Some(project) = self.store.get_project(&session.project_id) else {
            let message = format!("project not found: {}", session.project_id);
            self.store.fail_job(&job.id, &message)?;
            self.store.finalize_run(
                &run.id,
                RunStatus::Failed,
                now,
                Some(minimal_summary(RunOutcome::Error)),
            )?;
            return Ok(None);
        };

        let _guard = ActiveGuard::enter(&self.active_sessions, run.session_id.as_str());

        let started_at = self.clock.epoch_ms();
        self.store.mark_run_in_flight(&run.id, started_at)?;

        let chat_external_id = session
            .chat_id
            .as_ref()
            .and_then(|chat_id| self.store.get_chat(chat_id))
            .map(|chat| chat.external_chat_id);

        let ctx = ExecutionContext {
            run_id: run.id.clone(),
            provider: session.provider,
            prompt: run.prompt.clone(),
            project,
            session,
            chat_external_id,
        };
        let observer = Arc::new(PersistingObserver {
            store: Arc::clone(&self.store),
            sink: Arc::clone(&self.sink),
            clock_ms: {
                let clock = self.clock.clone();
                Box::new(move || clock.epoch_ms())
            },
            run_id: run.id.clone(),
            chat_external_id,
            tool_starts: AtomicU64::new(0),
            encoded_bytes: AtomicU64::new(0),
        });

        tracing::info!(
            run_id = %run.id,
            session_id = %run.session_id,
            provider = %ctx.provider,
            "executing run"
        );

        match self.executor.execute(&ctx, observer.clone()).await {
            Ok(report) => {
                if !report.events_persisted {
                    for event in &report.events {
                        observer.on_event(event.clone()).await?;
                    }
                }
                let finished_at = self.clock.epoch_ms();
                let summary = RunSummary {
                    duration_ms: finished_at.saturating_sub(started_at),
                    tool_calls_count: observer.tool_starts.load(Ordering::SeqCst),
                    bytes_in: report.bytes_in,
                    bytes_out: report
                        .bytes_out
                        .unwrap_or_else(|| observer.encoded_bytes.load(Ordering::SeqCst)),
                    exit_status: report.exit_status,
                };
                let status = Run::status_for_outcome(report.exit_status);
                self.store
                    .finalize_run(&run.id, status, finished_at, Some(summary.clone()))?;
                self.store.complete_job(&job.id)?;
                tracing::info!(
                    run_id = %run.id,
                    status = %status,
                    duration_ms = summary.duration_ms,
                    tool_calls = summary.tool_calls_count,
                    "run finalized"
                );
                self.sink
                    .on_finished(
                        chat_external_id,
                        &run.id,
                        &RunFinish {
                            status: report.exit_status,
                            duration_ms: summary.duration_ms,
                            engine_session_id: report.engine_session_id,
                        },
                    )
                    .await;
                Ok(Some(run.id))
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!(run_id = %run.id, error = %message, "executor failed");
                // Best-effort breadcrumbs; the original error wins.
                let _ = observer
                    .on_event(EngineEvent::Error {
                        message: message.clone(),
                        code: None,
                    })
                    .await;
                let finished_at = self.clock.epoch_ms();
                let _ = self.store.finalize_run(
                    &run.id,
                    RunStatus::Failed,
                    finished_at,
                    Some(RunSummary {
                        duration_ms: finished_at.saturating_sub(started_at),
                        tool_calls_count: observer.tool_starts.load(Ordering::SeqCst),
                        bytes_in: 0,
                        bytes_out: observer.encoded_bytes.load(Ordering::SeqCst),
                        exit_status: RunOutcome::Error,
                    }),
                );
                let _ = self.store.fail_job(&job.id, &message);
                self.sink
                    .on_finished(
                        chat_external_id,
                        &run.id,
                        &RunFinish {
                            status: RunOutcome::Error,
                            duration_ms: finished_at.saturating_sub(started_at),
                            engine_session_id: None,
                        },
                    )
                    .await;
                Err(e.into())
            }
        }
    }

    /// Abandon in-flight runs older than `stale_before_ms` and requeue
    /// their jobs.
    pub fn reconcile(
        &self,
        now: u64,
        stale_before_ms: u64,
    ) -> Result<ReconcileOutcome, OrchestratorError> {
        let cutoff = now.saturating_sub(stale_before_ms);
        let mut outcome = ReconcileOutcome::default();
        for run_id in self.store.stale_in_flight_runs(cutoff) {
            if self.store.abandon_run(&run_id)? {
                outcome.abandoned_run_ids.push(run_id.clone());
                if self.store.requeue_leased_job_by_run_id(&run_id, now)? {
                    outcome.requeued += 1;
                }
            }
        }
        if !outcome.abandoned_run_ids.is_empty() {
            tracing::warn!(
                abandoned = outcome.abandoned_run_ids.len(),
                requeued = outcome.requeued,
                "reconciled stale in-flight runs"
            );
        }
        Ok(outcome)
    }
}

#[async_trait]
impl<C: Clock, G: IdGen> RunService for RunOrchestrator<C, G> {
    async fn enqueue(&self, req: EnqueueRequest) -> Result<Run, OrchestratorError> {
        self.enqueue_run(req)
    }
}

/// Removes the session key from the active set on scope exit.
struct ActiveGuard {
    set: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl ActiveGuard {
    fn enter(set: &Arc<Mutex<HashSet<String>>>, key: &str) -> Self {
        set.lock().insert(key.to_string());
        Self {
            set: Arc::clone(set),
            key: key.to_string(),
        }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.key);
    }
}

fn minimal_summary(exit_status: RunOutcome) -> RunSummary {
    RunSummary {
        duration_ms: 0,
        tool_calls_count: 0,
        bytes_in: 0,
        bytes_out: 0,
        exit_status,
    }
}

/// Observer that persists each event in arrival order, then forwards it
/// to the sink.
struct PersistingObserver {
    store: Arc<Store>,
    sink: Arc<dyn EventSink>,
    clock_ms: Box<dyn Fn() -> u64 + Send + Sync>,
    run_id: RunId,
    chat_external_id: Option<i64>,
    tool_starts: AtomicU64,
    encoded_bytes: AtomicU64,
}

#[async_trait]
impl RunEventObserver for PersistingObserver {
    async fn on_event(&self, event: EngineEvent) -> Result<(), ExecuteError> {
        if matches!(event, EngineEvent::ToolStart { .. }) {
            self.tool_starts.fetch_add(1, Ordering::SeqCst);
        }
        if let Ok(encoded) = serde_json::to_vec(&event) {
            self.encoded_bytes
                .fetch_add(encoded.len() as u64, Ordering::SeqCst);
        }
        self.store
            .append_run_event(&self.run_id, event.clone(), (self.clock_ms)())?;
        self.sink
            .on_event(self.chat_external_id, &self.run_id, &event)
            .await;
        Ok(())
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;

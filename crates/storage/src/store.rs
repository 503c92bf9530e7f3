// SPDX-License-Identifier: MIT

//! The store facade: one lock over state + WAL.
//!
//! Every mutation appends its [`StateOp`] to the WAL buffer and applies
//! it to the materialized state before the lock is released, so readers
//! always observe the post-op state and two concurrent mutations are
//! fully serialized. Durability is the WAL flush (group commit); the
//! daemon drives `flush()` on a short interval and checkpoints
//! periodically.

use crate::snapshot::{Snapshot, SnapshotError};
use crate::state::{MaterializedState, StateOp};
use crate::wal::{Wal, WalError};
use parking_lot::Mutex;
use relay_core::{
    AuditEntry, ChatId, ChatRecord, EngineEvent, FileRecord, InboxUpdate, Job, JobStatus, Project,
    ProjectId, Run, RunEvent, RunId, RunStatus, RunSummary, Session, SessionId,
};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("idempotency key already used by run {0}")]
    DuplicateIdempotencyKey(RunId),
    #[error("session already has an active run: {0}")]
    SessionActive(SessionId),
}

fn not_found(kind: &'static str, id: impl ToString) -> StoreError {
    StoreError::NotFound {
        kind,
        id: id.to_string(),
    }
}

struct Inner {
    state: MaterializedState,
    wal: Wal,
}

impl Inner {
    fn record(&mut self, op: StateOp) -> Result<(), StoreError> {
        self.wal.append(&op)?;
        self.state.apply(&op);
        Ok(())
    }
}

pub struct Store {
    inner: Mutex<Inner>,
}

impl Store {
    /// File name of the WAL under the data dir.
    pub const WAL_FILE: &'static str = "state.wal";
    /// File name of the snapshot under the data dir.
    pub const SNAPSHOT_FILE: &'static str = "state.snapshot.zst";

    /// Open the store under a data directory: load the snapshot if any,
    /// replay the WAL tail, and be ready for new operations.
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let snapshot_path = data_dir.join(Self::SNAPSHOT_FILE);
        let wal_path = data_dir.join(Self::WAL_FILE);

        let (mut state, covered_seq) = match Snapshot::load(&snapshot_path)? {
            Some(snapshot) => (snapshot.state, snapshot.seq),
            None => (MaterializedState::default(), 0),
        };

        let mut wal = Wal::open(&wal_path)?;
        let replayed = wal.entries_after(covered_seq)?;
        let replay_count = replayed.len();
        for entry in replayed {
            state.apply(&entry.op);
        }
        if replay_count > 0 {
            tracing::info!(replay_count, covered_seq, "replayed WAL tail");
        }

        Ok(Self {
            inner: Mutex::new(Inner { state, wal }),
        })
    }

    /// Flush buffered WAL entries to disk (the durability point).
    pub fn flush(&self) -> Result<(), StoreError> {
        Ok(self.inner.lock().wal.flush()?)
    }

    pub fn needs_flush(&self) -> bool {
        self.inner.lock().wal.needs_flush()
    }

    /// Clone the state and its covering WAL sequence for a checkpoint.
    pub fn checkpoint_begin(&self) -> Result<(u64, MaterializedState), StoreError> {
        let mut inner = self.inner.lock();
        inner.wal.flush()?;
        Ok((inner.wal.write_seq(), inner.state.clone()))
    }

    /// Drop WAL entries covered by a durable snapshot.
    pub fn truncate_wal(&self, covered_seq: u64) -> Result<(), StoreError> {
        // Entries with seq <= covered_seq are in the snapshot.
        Ok(self.inner.lock().wal.truncate_before(covered_seq + 1)?)
    }

    // === Projects ===

    pub fn upsert_project(&self, project: Project) -> Result<(), StoreError> {
        self.inner
            .lock()
            .record(StateOp::ProjectUpserted { project })
    }

    pub fn delete_project(&self, id: &ProjectId) -> Result<(), StoreError> {
        self.inner
            .lock()
            .record(StateOp::ProjectDeleted { id: id.clone() })
    }

    /// Replace the project table with the given config: delete projects
    /// absent from it, then upsert present ones, in one critical section.
    pub fn reload_projects(&self, projects: &[Project]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let stale: Vec<ProjectId> = inner
            .state
            .projects
            .values()
            .filter(|existing| !projects.iter().any(|p| p.id == existing.id))
            .map(|existing| existing.id.clone())
            .collect();
        for id in stale {
            inner.record(StateOp::ProjectDeleted { id })?;
        }
        for project in projects {
            inner.record(StateOp::ProjectUpserted {
                project: project.clone(),
            })?;
        }
        Ok(())
    }

    pub fn get_project(&self, id: &ProjectId) -> Option<Project> {
        self.inner.lock().state.projects.get(id.as_str()).cloned()
    }

    pub fn list_projects(&self) -> Vec<Project> {
        self.inner.lock().state.projects.values().cloned().collect()
    }

    // === Chats ===

    pub fn get_chat(&self, id: &ChatId) -> Option<ChatRecord> {
        self.inner.lock().state.chats.get(id.as_str()).cloned()
    }

    pub fn get_chat_by_external(&self, external_chat_id: i64) -> Option<ChatRecord> {
        self.inner
            .lock()
            .state
            .chats
            .values()
            .find(|chat| chat.external_chat_id == external_chat_id)
            .cloned()
    }

    pub fn upsert_chat(&self, chat: ChatRecord) -> Result<(), StoreError> {
        self.inner.lock().record(StateOp::ChatUpserted { chat })
    }

    pub fn set_unsafe_until(
        &self,
        chat_id: &ChatId,
        unsafe_until: Option<u64>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if !inner.state.chats.contains_key(chat_id.as_str()) {
            return Err(not_found("chat", chat_id));
        }
        inner.record(StateOp::ChatUnsafeSet {
            chat_id: chat_id.clone(),
            unsafe_until,
        })
    }

    // === Sessions ===

    pub fn create_session(&self, session: Session) -> Result<(), StoreError> {
        self.inner.lock().record(StateOp::SessionCreated { session })
    }

    pub fn get_session(&self, id: &SessionId) -> Option<Session> {
        self.inner.lock().state.sessions.get(id.as_str()).cloned()
    }

    pub fn list_sessions(&self, project_id: &ProjectId) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .inner
            .lock()
            .state
            .sessions
            .values()
            .filter(|session| session.project_id == *project_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        sessions
    }

    pub fn set_engine_session_id(
        &self,
        session_id: &SessionId,
        engine_session_id: Option<String>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if !inner.state.sessions.contains_key(session_id.as_str()) {
            return Err(not_found("session", session_id));
        }
        inner.record(StateOp::SessionEngineIdSet {
            session_id: session_id.clone(),
            engine_session_id,
        })
    }

    // === Runs and jobs ===

    /// Insert a run and its job as a pair. Fails if the idempotency key
    /// is already taken or the session already has an active run; both
    /// checks happen under the same lock as the insert, so two racing
    /// enqueues cannot both pass.
    pub fn enqueue_run(&self, run: Run, job: Job) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner
            .state
            .runs
            .values()
            .find(|r| r.idempotency_key == run.idempotency_key)
        {
            return Err(StoreError::DuplicateIdempotencyKey(existing.id.clone()));
        }
        if inner.state.active_run_for_session(&run.session_id).is_some() {
            return Err(StoreError::SessionActive(run.session_id.clone()));
        }
        inner.record(StateOp::RunEnqueued { run, job })
    }

    pub fn get_run(&self, id: &RunId) -> Option<Run> {
        self.inner.lock().state.runs.get(id.as_str()).cloned()
    }

    pub fn get_run_by_idempotency_key(&self, key: &str) -> Option<Run> {
        self.inner
            .lock()
            .state
            .runs
            .values()
            .find(|run| run.idempotency_key == key)
            .cloned()
    }

    pub fn find_active_run_by_session(&self, session_id: &SessionId) -> Option<Run> {
        self.inner
            .lock()
            .state
            .active_run_for_session(session_id)
            .cloned()
    }

    pub fn job_for_run(&self, run_id: &RunId) -> Option<Job> {
        self.inner.lock().state.job_for_run(run_id).cloned()
    }

    /// Runs sorted newest-first.
    pub fn list_runs(&self) -> Vec<Run> {
        let mut runs: Vec<Run> = self.inner.lock().state.runs.values().cloned().collect();
        runs.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.as_str().cmp(a.id.as_str()))
        });
        runs
    }

    /// Atomically lease the oldest available job, if any.
    pub fn lease_next_job(
        &self,
        owner: &str,
        now: u64,
        lease_duration_ms: u64,
    ) -> Result<Option<Job>, StoreError> {
        let mut inner = self.inner.lock();
        let Some(job_id) = inner.state.next_leasable_job(now).map(|job| job.id.clone()) else {
            return Ok(None);
        };
        inner.record(StateOp::JobLeased {
            job_id: job_id.clone(),
            owner: owner.to_string(),
            lease_expires_at: now + lease_duration_ms,
        })?;
        Ok(inner.state.jobs.get(&job_id).cloned())
    }

    /// Extend a held lease. Returns false if the job is no longer leased.
    pub fn renew_job_lease(
        &self,
        job_id: &str,
        now: u64,
        lease_duration_ms: u64,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        let leased = inner
            .state
            .jobs
            .get(job_id)
            .is_some_and(|job| job.status == JobStatus::Leased);
        if !leased {
            return Ok(false);
        }
        inner.record(StateOp::JobLeaseRenewed {
            job_id: job_id.to_string(),
            lease_expires_at: now + lease_duration_ms,
        })?;
        Ok(true)
    }

    /// Flip a leased job back to queued, available immediately.
    pub fn requeue_leased_job_by_run_id(
        &self,
        run_id: &RunId,
        now: u64,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        let Some(job) = inner.state.job_for_run(run_id) else {
            return Ok(false);
        };
        if job.status != JobStatus::Leased {
            return Ok(false);
        }
        let job_id = job.id.clone();
        inner.record(StateOp::JobRequeued {
            job_id,
            available_at: now,
        })?;
        Ok(true)
    }

    pub fn mark_run_in_flight(&self, run_id: &RunId, now: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let prompt = inner
            .state
            .runs
            .get(run_id.as_str())
            .map(|run| run.prompt.clone())
            .ok_or_else(|| not_found("run", run_id))?;
        inner.record(StateOp::RunMarkedInFlight {
            run_id: run_id.clone(),
            started_at: now,
            prompt,
        })
    }

    pub fn finalize_run(
        &self,
        run_id: &RunId,
        status: RunStatus,
        finished_at: u64,
        summary: Option<RunSummary>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if !inner.state.runs.contains_key(run_id.as_str()) {
            return Err(not_found("run", run_id));
        }
        inner.record(StateOp::RunFinalized {
            run_id: run_id.clone(),
            status,
            finished_at,
            summary,
        })
    }

    pub fn complete_job(&self, job_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if !inner.state.jobs.contains_key(job_id) {
            return Err(not_found("job", job_id));
        }
        inner.record(StateOp::JobCompleted {
            job_id: job_id.to_string(),
        })
    }

    pub fn fail_job(&self, job_id: &str, error: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if !inner.state.jobs.contains_key(job_id) {
            return Err(not_found("job", job_id));
        }
        inner.record(StateOp::JobFailed {
            job_id: job_id.to_string(),
            error: error.to_string(),
        })
    }

    /// Cancel a run (and its job). Returns false if already terminal.
    pub fn cancel_run(&self, run_id: &RunId, now: u64) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        let active = inner
            .state
            .runs
            .get(run_id.as_str())
            .is_some_and(|run| run.status.is_active());
        if !active {
            return Ok(false);
        }
        inner.record(StateOp::RunCancelled {
            run_id: run_id.clone(),
            finished_at: now,
        })?;
        Ok(true)
    }

    /// Mark an in-flight run abandoned. Idempotent: returns false when
    /// the run is in any other state.
    pub fn abandon_run(&self, run_id: &RunId) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        let in_flight = inner
            .state
            .runs
            .get(run_id.as_str())
            .is_some_and(|run| run.status == RunStatus::InFlight);
        if !in_flight {
            return Ok(false);
        }
        inner.record(StateOp::RunAbandoned {
            run_id: run_id.clone(),
        })?;
        Ok(true)
    }

    pub fn stale_in_flight_runs(&self, cutoff: u64) -> Vec<RunId> {
        self.inner.lock().state.stale_in_flight_runs(cutoff)
    }

    // === Run events ===

    /// Append one event with the next per-run sequence number. The
    /// store lock makes concurrent appends produce distinct, gap-free
    /// sequences.
    pub fn append_run_event(
        &self,
        run_id: &RunId,
        event: EngineEvent,
        now: u64,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock();
        if !inner.state.runs.contains_key(run_id.as_str()) {
            return Err(not_found("run", run_id));
        }
        let seq = inner.state.next_event_seq(run_id);
        inner.record(StateOp::RunEventAppended {
            event: RunEvent {
                run_id: run_id.clone(),
                seq,
                event,
                created_at: now,
            },
        })?;
        Ok(seq)
    }

    pub fn run_events(&self, run_id: &RunId) -> Vec<RunEvent> {
        self.inner
            .lock()
            .state
            .run_events
            .get(run_id.as_str())
            .cloned()
            .unwrap_or_default()
    }

    // === Inbox ===

    /// First-writer-wins dedupe. Returns true when the update was
    /// accepted (first occurrence of this update id).
    pub fn insert_inbox_update(&self, update: InboxUpdate) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        if inner.state.inbox.contains_key(&update.update_id) {
            return Ok(false);
        }
        inner.record(StateOp::InboxInserted { update })?;
        Ok(true)
    }

    // === Files ===

    pub fn insert_file_record(&self, record: FileRecord) -> Result<(), StoreError> {
        self.inner.lock().record(StateOp::FileInserted { record })
    }

    pub fn list_file_records(&self) -> Vec<FileRecord> {
        self.inner.lock().state.files.clone()
    }

    // === Audit ===

    pub fn append_audit(&self, entry: AuditEntry) -> Result<(), StoreError> {
        self.inner.lock().record(StateOp::AuditAppended { entry })
    }

    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.inner.lock().state.audit.clone()
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;

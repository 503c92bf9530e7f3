// SPDX-License-Identifier: MIT

//! Materialized state and the operation log that mutates it.
//!
//! Every mutation the store performs is first expressed as a [`StateOp`]
//! carrying all computed values (timestamps, sequence numbers, lease
//! expiries), so applying an op is deterministic and WAL replay after a
//! crash reconstructs the exact same state.

use indexmap::IndexMap;
use relay_core::{
    AuditEntry, ChatId, ChatRecord, FileRecord, InboxUpdate, Job, JobStatus, Project, ProjectId,
    Run, RunEvent, RunId, RunStatus, RunSummary, Session, SessionId, SessionStatus,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One durable mutation. The WAL stores these as JSONL records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StateOp {
    ProjectUpserted {
        project: Project,
    },
    ProjectDeleted {
        id: ProjectId,
    },
    ChatUpserted {
        chat: ChatRecord,
    },
    ChatUnsafeSet {
        chat_id: ChatId,
        unsafe_until: Option<u64>,
    },
    SessionCreated {
        session: Session,
    },
    SessionEngineIdSet {
        session_id: SessionId,
        engine_session_id: Option<String>,
    },
    /// Run + job inserted as a pair (the enqueue invariant).
    RunEnqueued {
        run: Run,
        job: Job,
    },
    JobLeased {
        job_id: String,
        owner: String,
        lease_expires_at: u64,
    },
    JobLeaseRenewed {
        job_id: String,
        lease_expires_at: u64,
    },
    JobRequeued {
        job_id: String,
        available_at: u64,
    },
    JobCompleted {
        job_id: String,
    },
    JobFailed {
        job_id: String,
        error: String,
    },
    RunMarkedInFlight {
        run_id: RunId,
        started_at: u64,
        prompt: String,
    },
    RunFinalized {
        run_id: RunId,
        status: RunStatus,
        finished_at: u64,
        summary: Option<RunSummary>,
    },
    /// Cancels the run and its job together, clearing any lease.
    RunCancelled {
        run_id: RunId,
        finished_at: u64,
    },
    RunAbandoned {
        run_id: RunId,
    },
    RunEventAppended {
        event: RunEvent,
    },
    InboxInserted {
        update: InboxUpdate,
    },
    FileInserted {
        record: FileRecord,
    },
    AuditAppended {
        entry: AuditEntry,
    },
}

/// The complete in-memory state, rebuilt from snapshot + WAL replay.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaterializedState {
    /// Keyed by project id; iteration order is config order.
    pub projects: IndexMap<String, Project>,
    pub chats: HashMap<String, ChatRecord>,
    pub sessions: HashMap<String, Session>,
    pub runs: HashMap<String, Run>,
    pub jobs: HashMap<String, Job>,
    pub run_events: HashMap<String, Vec<RunEvent>>,
    pub inbox: HashMap<i64, InboxUpdate>,
    pub files: Vec<FileRecord>,
    pub audit: Vec<AuditEntry>,
}

impl MaterializedState {
    /// Apply one operation. Unknown targets are ignored rather than
    /// erroring so that replay tolerates ops against records a later
    /// op deletes.
    pub fn apply(&mut self, op: &StateOp) {
        match op {
            StateOp::ProjectUpserted { project } => {
                // Upserts append, so a reload replayed in config order
                // leaves the table in config order.
                self.projects.shift_remove(project.id.as_str());
                self.projects
                    .insert(project.id.as_str().to_string(), project.clone());
            }
            StateOp::ProjectDeleted { id } => {
                self.projects.shift_remove(id.as_str());
            }
            StateOp::ChatUpserted { chat } => {
                self.chats.insert(chat.id.as_str().to_string(), chat.clone());
            }
            StateOp::ChatUnsafeSet {
                chat_id,
                unsafe_until,
            } => {
                if let Some(chat) = self.chats.get_mut(chat_id.as_str()) {
                    chat.unsafe_until = *unsafe_until;
                }
            }
            StateOp::SessionCreated { session } => {
                self.sessions
                    .insert(session.id.as_str().to_string(), session.clone());
            }
            StateOp::SessionEngineIdSet {
                session_id,
                engine_session_id,
            } => {
                if let Some(session) = self.sessions.get_mut(session_id.as_str()) {
                    session.engine_session_id = engine_session_id.clone();
                }
            }
            StateOp::RunEnqueued { run, job } => {
                self.runs.insert(run.id.as_str().to_string(), run.clone());
                self.jobs.insert(job.id.clone(), job.clone());
            }
            StateOp::JobLeased {
                job_id,
                owner,
                lease_expires_at,
            } => {
                if let Some(job) = self.jobs.get_mut(job_id) {
                    job.status = JobStatus::Leased;
                    job.lease_owner = Some(owner.clone());
                    job.lease_expires_at = Some(*lease_expires_at);
                    job.attempts += 1;
                    if let Some(run) = self.runs.get_mut(job.run_id.as_str()) {
                        if run.status == RunStatus::Queued {
                            run.status = RunStatus::Leased;
                        }
                    }
                }
            }
            StateOp::JobLeaseRenewed {
                job_id,
                lease_expires_at,
            } => {
                if let Some(job) = self.jobs.get_mut(job_id) {
                    if job.status == JobStatus::Leased {
                        job.lease_expires_at = Some(*lease_expires_at);
                    }
                }
            }
            StateOp::JobRequeued {
                job_id,
                available_at,
            } => {
                if let Some(job) = self.jobs.get_mut(job_id) {
                    job.status = JobStatus::Queued;
                    job.lease_owner = None;
                    job.lease_expires_at = None;
                    job.available_at = *available_at;
                    if let Some(run) = self.runs.get_mut(job.run_id.as_str()) {
                        if run.status == RunStatus::Leased {
                            run.status = RunStatus::Queued;
                        }
                    }
                }
            }
            StateOp::JobCompleted { job_id } => {
                if let Some(job) = self.jobs.get_mut(job_id) {
                    job.status = JobStatus::Completed;
                    job.lease_owner = None;
                    job.lease_expires_at = None;
                }
            }
            StateOp::JobFailed { job_id, error } => {
                if let Some(job) = self.jobs.get_mut(job_id) {
                    job.status = JobStatus::Failed;
                    job.lease_owner = None;
                    job.lease_expires_at = None;
                    job.last_error = Some(error.clone());
                }
            }
            StateOp::RunMarkedInFlight {
                run_id,
                started_at,
                prompt,
            } => {
                if let Some(run) = self.runs.get_mut(run_id.as_str()) {
                    run.status = RunStatus::InFlight;
                    run.started_at = Some(*started_at);
                    if let Some(session) = self.sessions.get_mut(run.session_id.as_str()) {
                        session.status = SessionStatus::Active;
                        session.prompt = prompt.clone();
                    }
                }
            }
            StateOp::RunFinalized {
                run_id,
                status,
                finished_at,
                summary,
            } => {
                if let Some(run) = self.runs.get_mut(run_id.as_str()) {
                    run.status = *status;
                    run.finished_at = Some(*finished_at);
                    run.summary = summary.clone();
                    if let Some(session) = self.sessions.get_mut(run.session_id.as_str()) {
                        session.status = SessionStatus::Idle;
                    }
                }
            }
            StateOp::RunCancelled {
                run_id,
                finished_at,
            } => {
                if let Some(run) = self.runs.get_mut(run_id.as_str()) {
                    run.status = RunStatus::Cancelled;
                    run.finished_at = Some(*finished_at);
                    if let Some(session) = self.sessions.get_mut(run.session_id.as_str()) {
                        session.status = SessionStatus::Idle;
                    }
                }
                if let Some(job) = self.job_for_run_mut(run_id) {
                    job.status = JobStatus::Cancelled;
                    job.lease_owner = None;
                    job.lease_expires_at = None;
                }
            }
            StateOp::RunAbandoned { run_id } => {
                if let Some(run) = self.runs.get_mut(run_id.as_str()) {
                    // Only an in-flight run can be abandoned; a concurrent
                    // finalize wins.
                    if run.status == RunStatus::InFlight {
                        run.status = RunStatus::Abandoned;
                        if let Some(session) = self.sessions.get_mut(run.session_id.as_str()) {
                            session.status = SessionStatus::Idle;
                        }
                    }
                }
            }
            StateOp::RunEventAppended { event } => {
                self.run_events
                    .entry(event.run_id.as_str().to_string())
                    .or_default()
                    .push(event.clone());
            }
            StateOp::InboxInserted { update } => {
                self.inbox.entry(update.update_id).or_insert_with(|| update.clone());
            }
            StateOp::FileInserted { record } => {
                self.files.push(record.clone());
            }
            StateOp::AuditAppended { entry } => {
                self.audit.push(entry.clone());
            }
        }
    }

    /// Find the run currently counting against a session's single-flight
    /// budget, if any.
    pub fn active_run_for_session(&self, session_id: &SessionId) -> Option<&Run> {
        self.runs
            .values()
            .find(|run| run.session_id == *session_id && run.status.is_active())
    }

    /// The job attached to a run (exactly one per run).
    pub fn job_for_run(&self, run_id: &RunId) -> Option<&Job> {
        self.jobs.values().find(|job| job.run_id == *run_id)
    }

    fn job_for_run_mut(&mut self, run_id: &RunId) -> Option<&mut Job> {
        self.jobs.values_mut().find(|job| job.run_id == *run_id)
    }

    /// Pick the next leasable job: oldest `available_at` wins, job id
    /// breaks ties for determinism.
    pub fn next_leasable_job(&self, now: u64) -> Option<&Job> {
        self.jobs
            .values()
            .filter(|job| job.leasable(now))
            .min_by(|a, b| {
                a.available_at
                    .cmp(&b.available_at)
                    .then_with(|| a.id.cmp(&b.id))
            })
    }

    /// Next event sequence number for a run (gap-free, starts at 1).
    pub fn next_event_seq(&self, run_id: &RunId) -> u64 {
        self.run_events
            .get(run_id.as_str())
            .map(|events| events.len() as u64)
            .unwrap_or(0)
            + 1
    }

    /// Ids of in-flight runs that started before `cutoff`.
    pub fn stale_in_flight_runs(&self, cutoff: u64) -> Vec<RunId> {
        let mut ids: Vec<RunId> = self
            .runs
            .values()
            .filter(|run| {
                run.status == RunStatus::InFlight
                    && run.started_at.is_some_and(|started| started < cutoff)
            })
            .map(|run| run.id.clone())
            .collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;

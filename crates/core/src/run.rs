// SPDX-License-Identifier: MIT

//! Run record and status machine.

use crate::event::RunOutcome;
use crate::id::{ProjectId, RunId, SessionId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a run through its lifecycle.
///
/// `Queued → Leased → InFlight` and then exactly one terminal state.
/// `Abandoned` marks a stale in-flight run reopened by reconciliation;
/// it is distinct from `Failed` and `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Leased,
    InFlight,
    Completed,
    Failed,
    Cancelled,
    Abandoned,
}

impl RunStatus {
    /// True for states that count against the per-session single-flight
    /// invariant.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RunStatus::Queued | RunStatus::Leased | RunStatus::InFlight
        )
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Queued => "queued",
            RunStatus::Leased => "leased",
            RunStatus::InFlight => "in_flight",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Abandoned => "abandoned",
        };
        f.write_str(s)
    }
}

/// Derived summary persisted when a run finalizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub duration_ms: u64,
    pub tool_calls_count: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub exit_status: RunOutcome,
}

/// One prompt execution against a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub project_id: ProjectId,
    pub session_id: SessionId,
    /// Client-provided token; repeat enqueues with the same key return
    /// this run instead of creating another.
    pub idempotency_key: String,
    pub prompt: String,
    pub status: RunStatus,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<RunSummary>,
}

impl Run {
    /// Map a terminal outcome to the run status it finalizes as.
    pub fn status_for_outcome(outcome: RunOutcome) -> RunStatus {
        match outcome {
            RunOutcome::Success => RunStatus::Completed,
            RunOutcome::Cancelled => RunStatus::Cancelled,
            RunOutcome::Error | RunOutcome::Unknown => RunStatus::Failed,
        }
    }
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;

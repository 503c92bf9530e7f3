// SPDX-License-Identifier: MIT

//! Job record: the queue entry attached 1:1 to a run.

use crate::id::RunId;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Leased,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Leased => "leased",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Queue record carrying lease and scheduling metadata for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub run_id: RunId,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<u64>,
    /// Earliest epoch ms this job may be leased.
    pub available_at: u64,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Job {
    /// Whether this job can be leased at `now`: queued, available, and
    /// not covered by a live lease.
    pub fn leasable(&self, now: u64) -> bool {
        self.status == JobStatus::Queued
            && self.available_at <= now
            && self.lease_expires_at.is_none_or(|exp| exp <= now)
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;

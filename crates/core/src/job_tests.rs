// SPDX-License-Identifier: MIT

use super::{Job, JobStatus};

fn job(status: JobStatus, available_at: u64, lease_expires_at: Option<u64>) -> Job {
    Job {
        id: "job-1".into(),
        run_id: "run-1".into(),
        status,
        lease_owner: None,
        lease_expires_at,
        available_at,
        attempts: 0,
        last_error: None,
    }
}

#[yare::parameterized(
    ready            = { JobStatus::Queued, 100, None, 100, true },
    not_yet_available = { JobStatus::Queued, 200, None, 100, false },
    lease_live       = { JobStatus::Queued, 0, Some(500), 100, false },
    lease_expired    = { JobStatus::Queued, 0, Some(50), 100, true },
    already_leased   = { JobStatus::Leased, 0, None, 100, false },
    completed        = { JobStatus::Completed, 0, None, 100, false },
)]
fn leasable(
    status: JobStatus,
    available_at: u64,
    lease_expires_at: Option<u64>,
    now: u64,
    expected: bool,
) {
    assert_eq!(job(status, available_at, lease_expires_at).leasable(now), expected);
}

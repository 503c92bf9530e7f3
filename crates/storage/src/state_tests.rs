// SPDX-License-Identifier: MIT

use super::*;
use relay_core::test_support;
use relay_core::{EngineEvent, RunOutcome};

fn enqueue(state: &mut MaterializedState, run_id: &str, session_id: &str) {
    let run = test_support::run(run_id, session_id, &format!("key-{run_id}"));
    let job = test_support::job(&format!("job-{run_id}"), run_id);
    state.apply(&StateOp::RunEnqueued { run, job });
}

#[test]
fn enqueue_inserts_run_and_job_pair() {
    let mut state = MaterializedState::default();
    enqueue(&mut state, "run-1", "s1");

    assert!(state.runs.contains_key("run-1"));
    let job = state.job_for_run(&"run-1".into()).unwrap();
    assert_eq!(job.status, JobStatus::Queued);
}

#[test]
fn lease_marks_job_and_run() {
    let mut state = MaterializedState::default();
    enqueue(&mut state, "run-1", "s1");
    state.apply(&StateOp::JobLeased {
        job_id: "job-run-1".into(),
        owner: "worker-0".into(),
        lease_expires_at: 30_000,
    });

    let job = &state.jobs["job-run-1"];
    assert_eq!(job.status, JobStatus::Leased);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.lease_owner.as_deref(), Some("worker-0"));
    assert_eq!(state.runs["run-1"].status, RunStatus::Leased);
}

#[test]
fn requeue_clears_lease_and_reopens_run() {
    let mut state = MaterializedState::default();
    enqueue(&mut state, "run-1", "s1");
    state.apply(&StateOp::JobLeased {
        job_id: "job-run-1".into(),
        owner: "worker-0".into(),
        lease_expires_at: 30_000,
    });
    state.apply(&StateOp::JobRequeued {
        job_id: "job-run-1".into(),
        available_at: 2_000,
    });

    let job = &state.jobs["job-run-1"];
    assert_eq!(job.status, JobStatus::Queued);
    assert!(job.lease_owner.is_none());
    assert!(job.lease_expires_at.is_none());
    assert_eq!(job.available_at, 2_000);
    assert_eq!(state.runs["run-1"].status, RunStatus::Queued);
}

#[test]
fn next_leasable_prefers_oldest_available() {
    let mut state = MaterializedState::default();
    enqueue(&mut state, "run-a", "s1");
    enqueue(&mut state, "run-b", "s2");
    if let Some(job) = state.jobs.get_mut("job-run-a") {
        job.available_at = 500;
    }
    if let Some(job) = state.jobs.get_mut("job-run-b") {
        job.available_at = 100;
    }

    let next = state.next_leasable_job(1_000).unwrap();
    assert_eq!(next.run_id, *"run-b");
}

#[test]
fn next_leasable_skips_future_and_live_leases() {
    let mut state = MaterializedState::default();
    enqueue(&mut state, "run-a", "s1");
    if let Some(job) = state.jobs.get_mut("job-run-a") {
        job.available_at = 5_000;
    }
    assert!(state.next_leasable_job(1_000).is_none());
}

#[test]
fn cancel_run_cancels_job_too() {
    let mut state = MaterializedState::default();
    enqueue(&mut state, "run-1", "s1");
    state.apply(&StateOp::RunCancelled {
        run_id: "run-1".into(),
        finished_at: 9_000,
    });

    assert_eq!(state.runs["run-1"].status, RunStatus::Cancelled);
    assert_eq!(state.runs["run-1"].finished_at, Some(9_000));
    assert_eq!(state.jobs["job-run-1"].status, JobStatus::Cancelled);
}

#[test]
fn abandon_only_applies_to_in_flight() {
    let mut state = MaterializedState::default();
    enqueue(&mut state, "run-1", "s1");

    state.apply(&StateOp::RunAbandoned {
        run_id: "run-1".into(),
    });
    assert_eq!(state.runs["run-1"].status, RunStatus::Queued);

    state.apply(&StateOp::RunMarkedInFlight {
        run_id: "run-1".into(),
        started_at: 100,
        prompt: "hi".into(),
    });
    state.apply(&StateOp::RunAbandoned {
        run_id: "run-1".into(),
    });
    assert_eq!(state.runs["run-1"].status, RunStatus::Abandoned);
}

#[test]
fn run_events_accumulate_in_order() {
    let mut state = MaterializedState::default();
    enqueue(&mut state, "run-1", "s1");
    for seq in 1..=3 {
        let event = relay_core::RunEvent {
            run_id: "run-1".into(),
            seq,
            event: EngineEvent::TextDelta {
                text: format!("chunk {seq}"),
                channel: None,
            },
            created_at: seq * 10,
        };
        state.apply(&StateOp::RunEventAppended { event });
    }

    assert_eq!(state.next_event_seq(&"run-1".into()), 4);
    let seqs: Vec<u64> = state.run_events["run-1"].iter().map(|e| e.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3]);
}

#[test]
fn inbox_first_writer_wins() {
    let mut state = MaterializedState::default();
    let first = relay_core::InboxUpdate {
        update_id: 7,
        chat_id: Some(100),
        payload: serde_json::json!({"n": 1}),
        received_at: 1,
    };
    let second = relay_core::InboxUpdate {
        update_id: 7,
        chat_id: Some(100),
        payload: serde_json::json!({"n": 2}),
        received_at: 2,
    };
    state.apply(&StateOp::InboxInserted { update: first });
    state.apply(&StateOp::InboxInserted { update: second });

    assert_eq!(state.inbox[&7].payload["n"], 1);
}

#[test]
fn stale_in_flight_runs_filters_by_start() {
    let mut state = MaterializedState::default();
    enqueue(&mut state, "run-old", "s1");
    enqueue(&mut state, "run-new", "s2");
    state.apply(&StateOp::RunMarkedInFlight {
        run_id: "run-old".into(),
        started_at: 2,
        prompt: String::new(),
    });
    state.apply(&StateOp::RunMarkedInFlight {
        run_id: "run-new".into(),
        started_at: 1_999,
        prompt: String::new(),
    });

    let stale = state.stale_in_flight_runs(1_000);
    assert_eq!(stale, vec![relay_core::RunId::new("run-old")]);
}

#[test]
fn finalize_records_summary_and_idles_session() {
    let mut state = MaterializedState::default();
    state.apply(&StateOp::SessionCreated {
        session: test_support::session("s1", "p1"),
    });
    enqueue(&mut state, "run-1", "s1");
    state.apply(&StateOp::RunMarkedInFlight {
        run_id: "run-1".into(),
        started_at: 100,
        prompt: "hi".into(),
    });
    assert_eq!(
        state.sessions["s1"].status,
        relay_core::SessionStatus::Active
    );

    state.apply(&StateOp::RunFinalized {
        run_id: "run-1".into(),
        status: RunStatus::Completed,
        finished_at: 400,
        summary: Some(relay_core::RunSummary {
            duration_ms: 300,
            tool_calls_count: 2,
            bytes_in: 5,
            bytes_out: 10,
            exit_status: RunOutcome::Success,
        }),
    });

    let run = &state.runs["run-1"];
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.summary.as_ref().unwrap().duration_ms, 300);
    assert_eq!(state.sessions["s1"].status, relay_core::SessionStatus::Idle);
}

#[test]
fn project_delete_removes_from_listing() {
    let mut state = MaterializedState::default();
    state.apply(&StateOp::ProjectUpserted {
        project: test_support::project("a"),
    });
    state.apply(&StateOp::ProjectUpserted {
        project: test_support::project("b"),
    });
    state.apply(&StateOp::ProjectDeleted { id: "a".into() });

    let ids: Vec<&str> = state.projects.keys().map(String::as_str).collect();
    assert_eq!(ids, vec!["b"]);
}

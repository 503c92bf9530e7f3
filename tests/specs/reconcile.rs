// SPDX-License-Identifier: MIT

//! S7: stale in-flight runs are abandoned and their jobs requeued.

use crate::prelude::*;
use relay_core::{JobStatus, RunStatus};
use relay_engine::test_support::ScriptedExecutor;
use relay_engine::EnqueueRequest;

#[tokio::test]
async fn stale_in_flight_run_is_reopened() {
    let world = world(ScriptedExecutor::happy_path());
    world
        .store
        .create_session(relay_core::test_support::session("s1", "p1"))
        .unwrap();

    // A worker leased the job and marked the run in-flight at t=2,
    // then died without finalizing.
    world.clock.set_epoch_ms(2);
    let run = world
        .orchestrator
        .enqueue_run(EnqueueRequest {
            project_id: "p1".into(),
            session_id: "s1".into(),
            idempotency_key: "k1".into(),
            prompt: "hi".into(),
        })
        .unwrap();
    world.store.lease_next_job("w0", 2, 30_000).unwrap().unwrap();
    world.store.mark_run_in_flight(&run.id, 2).unwrap();

    // At t=2000 with a staleness bound of 1 ms, reconcile reopens it.
    let outcome = world.orchestrator.reconcile(2_000, 1).unwrap();
    assert_eq!(outcome.abandoned_run_ids, vec![run.id.clone()]);
    assert_eq!(outcome.requeued, 1);

    let run = world.store.get_run(&run.id).unwrap();
    assert_eq!(run.status, RunStatus::Abandoned);
    let job = world.store.job_for_run(&run.id).unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.available_at, 2_000);

    // The requeued job is leasable again and runs to completion this time.
    world.clock.set_epoch_ms(3_000);
    let processed = world.orchestrator.process("w1", 30_000).await.unwrap();
    assert!(processed.is_some());
}

// SPDX-License-Identifier: MIT

use super::*;
use crate::orchestrator::{EnqueueRequest, NullEventSink};
use crate::test_support::ScriptedExecutor;
use relay_core::test_support;
use relay_core::{FakeClock, SequentialIdGen};
use std::time::Duration;

fn pool_fixture(
    executor: ScriptedExecutor,
) -> (
    tempfile::TempDir,
    Arc<Store>,
    Arc<RunOrchestrator<FakeClock, SequentialIdGen>>,
    Arc<WorkerPool<FakeClock, SequentialIdGen>>,
) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path()).unwrap());
    store.upsert_project(test_support::project("p1")).unwrap();
    for n in 1..=4 {
        store
            .create_session(test_support::session(&format!("s{n}"), "p1"))
            .unwrap();
    }

    let clock = FakeClock::at(1_000);
    let orchestrator = Arc::new(RunOrchestrator::new(
        Arc::clone(&store),
        clock.clone(),
        SequentialIdGen::new("id"),
        Arc::new(executor),
        Arc::new(NullEventSink),
    ));
    let pool = Arc::new(WorkerPool::new(
        Arc::clone(&orchestrator),
        Arc::clone(&store),
        ProcessRunner::new(),
        clock,
        WorkerConfig {
            poll_interval: Duration::from_millis(20),
            lease_renewal_interval: Duration::from_millis(50),
            shutdown_drain: Duration::from_millis(500),
            ..WorkerConfig::default()
        },
    ));
    (dir, store, orchestrator, pool)
}

fn enqueue(orchestrator: &RunOrchestrator<FakeClock, SequentialIdGen>, session: &str, key: &str) {
    orchestrator
        .enqueue_run(EnqueueRequest {
            project_id: "p1".into(),
            session_id: session.into(),
            idempotency_key: key.to_string(),
            prompt: "go".to_string(),
        })
        .unwrap();
}

async fn wait_for<F: Fn() -> bool>(cond: F) {
    for _ in 0..100 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn pool_drains_the_queue() {
    let (_dir, store, orchestrator, pool) = pool_fixture(ScriptedExecutor::happy_path());
    for n in 1..=4 {
        enqueue(&orchestrator, &format!("s{n}"), &format!("k{n}"));
    }

    let shutdown = Arc::new(tokio::sync::Notify::new());
    let pool_task = tokio::spawn(Arc::clone(&pool).run(Arc::clone(&shutdown)));

    wait_for(|| {
        store
            .list_runs()
            .iter()
            .all(|run| run.status == relay_core::RunStatus::Completed)
    })
    .await;

    shutdown.notify_one();
    pool_task.await.unwrap();
    assert_eq!(pool.active_jobs(), 0);
}

#[tokio::test]
async fn concurrency_stays_under_the_cap() {
    let mut executor = ScriptedExecutor::happy_path();
    executor.delay = Some(Duration::from_millis(200));
    let calls = Arc::clone(&executor.calls);
    let (_dir, store, orchestrator, pool) = pool_fixture(executor);
    for n in 1..=4 {
        enqueue(&orchestrator, &format!("s{n}"), &format!("k{n}"));
    }

    let shutdown = Arc::new(tokio::sync::Notify::new());
    let pool_task = tokio::spawn(Arc::clone(&pool).run(Arc::clone(&shutdown)));

    // While the first three are executing, the fourth must wait.
    wait_for(|| calls.lock().len() >= 3).await;
    assert!(pool.active_jobs() <= 3);

    wait_for(|| {
        store
            .list_runs()
            .iter()
            .all(|run| run.status == relay_core::RunStatus::Completed)
    })
    .await;
    assert_eq!(calls.lock().len(), 4);

    shutdown.notify_one();
    pool_task.await.unwrap();
}

#[tokio::test]
async fn shutdown_waits_for_active_jobs() {
    let mut executor = ScriptedExecutor::happy_path();
    executor.delay = Some(Duration::from_millis(150));
    let (_dir, store, orchestrator, pool) = pool_fixture(executor);
    enqueue(&orchestrator, "s1", "k1");

    let shutdown = Arc::new(tokio::sync::Notify::new());
    let pool_task = tokio::spawn(Arc::clone(&pool).run(Arc::clone(&shutdown)));

    wait_for(|| pool.active_jobs() == 1).await;
    shutdown.notify_one();
    pool_task.await.unwrap();

    // The in-flight job got to finish inside the drain window.
    assert_eq!(
        store.list_runs()[0].status,
        relay_core::RunStatus::Completed
    );
}

#[tokio::test]
async fn lease_is_renewed_for_long_jobs() {
    let mut executor = ScriptedExecutor::happy_path();
    executor.delay = Some(Duration::from_millis(300));
    let (_dir, store, orchestrator, pool) = pool_fixture(executor);
    enqueue(&orchestrator, "s1", "k1");

    let shutdown = Arc::new(tokio::sync::Notify::new());
    let pool_task = tokio::spawn(Arc::clone(&pool).run(Arc::clone(&shutdown)));

    wait_for(|| pool.active_jobs() == 1).await;
    let run_id = store.list_runs()[0].id.clone();
    let initial_expiry = store.job_for_run(&run_id).unwrap().lease_expires_at;

    // Advance the fake clock so a renewal produces a later expiry.
    pool.clock_for_tests().advance(Duration::from_millis(5_000));
    wait_for(|| store.job_for_run(&run_id).unwrap().lease_expires_at > initial_expiry).await;

    shutdown.notify_one();
    pool_task.await.unwrap();
}

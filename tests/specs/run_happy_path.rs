// SPDX-License-Identifier: MIT

//! S1: a prompt becomes a completed run with a gap-free event trail.

use crate::prelude::*;
use relay_chat::Action;
use relay_core::RunStatus;
use relay_engine::test_support::ScriptedExecutor;

#[tokio::test(flavor = "multi_thread")]
async fn owner_prompt_runs_to_completion() {
    let world = world(ScriptedExecutor::happy_path());

    // Owner (42) sends "/run hello world" in private chat 100, message 7
    let actions = world
        .handler
        .handle_update(owner_message(1, 7, "/run hello world"))
        .await;

    // Reply announces the queued run
    let reply = actions
        .iter()
        .find_map(|action| match action {
            Action::Reply { text } => Some(text.clone()),
            _ => None,
        })
        .unwrap();
    assert!(reply.starts_with("Run queued: "));

    // The run was keyed deterministically from chat and message ids
    let run = world
        .store
        .get_run_by_idempotency_key("tg:100:7")
        .expect("run exists under tg:100:7");
    assert_eq!(run.status, RunStatus::Queued);
    assert_eq!(run.prompt, "hello world");
    let job = world.store.job_for_run(&run.id).unwrap();
    assert_eq!(job.status, relay_core::JobStatus::Queued);

    // A worker processes the queue
    let processed = world.orchestrator.process("w0", 30_000).await.unwrap();
    assert_eq!(processed, Some(run.id.clone()));

    let run = world.store.get_run(&run.id).unwrap();
    assert_eq!(run.status, RunStatus::Completed);

    // Event trail: run_started, text, run_finished(success), gap-free
    let events = world.store.run_events(&run.id);
    let seqs: Vec<u64> = events.iter().map(|event| event.seq).collect();
    assert_eq!(seqs, (1..=events.len() as u64).collect::<Vec<_>>());
    let types: Vec<&str> = events.iter().map(|event| event.event_type()).collect();
    assert!(types.contains(&"run_started"));
    assert!(types.contains(&"text_delta"));
    assert_eq!(types.last(), Some(&"run_finished"));

    // The streamer pushed the final text to the chat
    let texts: Vec<String> = world
        .transport
        .sent()
        .iter()
        .map(|message| message.text.clone())
        .chain(world.transport.edits().iter().map(|edit| edit.text.clone()))
        .collect();
    assert!(texts.iter().any(|text| text.contains("hello from the engine")));
}

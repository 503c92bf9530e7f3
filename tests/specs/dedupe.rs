// SPDX-License-Identifier: MIT

//! S2: redelivered updates produce exactly one run and no extra actions.

use crate::prelude::*;
use relay_engine::test_support::ScriptedExecutor;

#[tokio::test]
async fn duplicate_update_is_swallowed() {
    let world = world(ScriptedExecutor::happy_path());
    let update = owner_message(500, 7, "/run hello");

    let first = world.handler.handle_update(update.clone()).await;
    let second = world.handler.handle_update(update).await;

    assert!(!first.is_empty());
    assert!(second.is_empty());

    // Exactly one run exists
    assert_eq!(world.store.list_runs().len(), 1);
}

#[tokio::test]
async fn retransmitted_message_reuses_the_run() {
    let world = world(ScriptedExecutor::happy_path());

    // Same message id arrives under two different update ids (Telegram
    // retransmit after a dropped ack): the idempotency key dedupes.
    world
        .handler
        .handle_update(owner_message(500, 7, "/run hello"))
        .await;
    let actions = world
        .handler
        .handle_update(owner_message(501, 7, "/run hello"))
        .await;

    assert!(!actions.is_empty());
    assert_eq!(world.store.list_runs().len(), 1);
}

// SPDX-License-Identifier: MIT

//! S3 and S4: non-owner rejection and the kill switch.

use crate::prelude::*;
use relay_chat::transport::ChatKind;
use relay_chat::Action;
use relay_core::AuditDecision;
use relay_engine::test_support::ScriptedExecutor;

fn reply_texts(actions: &[Action]) -> Vec<String> {
    actions
        .iter()
        .filter_map(|action| match action {
            Action::Reply { text } => Some(text.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn non_owner_is_rejected_with_audit_trail() {
    let world = world(ScriptedExecutor::happy_path());

    let actions = world
        .handler
        .handle_update(message_from(1, 1, 77, ChatKind::Private, "/run hi"))
        .await;

    // Exactly one reply, matching /owner only/i
    let replies = reply_texts(&actions);
    assert_eq!(replies.len(), 1);
    assert!(replies[0].to_lowercase().contains("owner only"));

    // No run was created
    assert!(world.store.list_runs().is_empty());

    // Audit row: deny / non-owner
    let audit = world.store.audit_log();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].decision, AuditDecision::Deny);
    assert_eq!(audit[0].reason.as_deref(), Some("non-owner"));
    assert_eq!(audit[0].user_id, Some(77));
}

#[tokio::test]
async fn kill_switch_blocks_new_runs() {
    let world = world_with(ScriptedExecutor::happy_path(), |config| {
        config.kill_switch_disable_runs = true;
    });

    let actions = world
        .handler
        .handle_update(owner_message(1, 1, "/run hi"))
        .await;

    let replies = reply_texts(&actions);
    assert!(replies[0].to_lowercase().contains("maintenance mode"));
    assert!(world.store.list_runs().is_empty());

    let audit = world.store.audit_log();
    let deny = audit
        .iter()
        .find(|entry| entry.decision == AuditDecision::Deny)
        .unwrap();
    assert_eq!(deny.reason.as_deref(), Some("kill-switch"));
}

// SPDX-License-Identifier: MIT

use super::*;
use crate::test_support::FakeRunService;
use crate::transport::{CallbackQuery, ChatKind, ChatRef, ChatUpdate, IncomingMessage, UserRef};
use relay_core::test_support;
use relay_core::{AuditDecision, FakeClock, SequentialIdGen};
use std::sync::atomic::{AtomicI64, Ordering};

const OWNER: i64 = 42;
const CHAT: i64 = 100;

static UPDATE_SEQ: AtomicI64 = AtomicI64::new(1);

struct Fixture {
    _dir: tempfile::TempDir,
    store: Arc<Store>,
    runs: Arc<FakeRunService>,
    clock: FakeClock,
    handler: ChatCommandHandler<FakeClock, SequentialIdGen>,
}

fn fixture() -> Fixture {
    fixture_with(|_| {})
}

fn fixture_with(tweak: impl FnOnce(&mut HandlerConfig)) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path()).unwrap());
    store.upsert_project(test_support::project("p1")).unwrap();
    store.upsert_project(test_support::project("p2")).unwrap();

    let runs = Arc::new(FakeRunService::default());
    let clock = FakeClock::at(1_000_000);
    let mut config = HandlerConfig {
        owner_user_id: OWNER,
        kill_switch_disable_runs: false,
        projects_config_path: None,
    };
    tweak(&mut config);
    let handler = ChatCommandHandler::new(
        Arc::clone(&store),
        runs.clone(),
        clock.clone(),
        SequentialIdGen::new("gen"),
        PrefsRegistry::new(),
        config,
    );
    Fixture {
        _dir: dir,
        store,
        runs,
        clock,
        handler,
    }
}

fn message_update(from: i64, chat: i64, kind: ChatKind, text: &str, message_id: i64) -> ChatUpdate {
    ChatUpdate {
        update_id: UPDATE_SEQ.fetch_add(1, Ordering::SeqCst),
        message: Some(IncomingMessage {
            message_id,
            chat: ChatRef { id: chat, kind },
            from: Some(UserRef {
                id: from,
                username: None,
            }),
            text: Some(text.to_string()),
        }),
        callback_query: None,
    }
}

fn owner_text(text: &str) -> ChatUpdate {
    message_update(OWNER, CHAT, ChatKind::Private, text, 7)
}

fn callback_update(data: &str) -> ChatUpdate {
    ChatUpdate {
        update_id: UPDATE_SEQ.fetch_add(1, Ordering::SeqCst),
        message: None,
        callback_query: Some(CallbackQuery {
            id: "cb1".to_string(),
            from: UserRef {
                id: OWNER,
                username: None,
            },
            message: Some(IncomingMessage {
                message_id: 55,
                chat: ChatRef {
                    id: CHAT,
                    kind: ChatKind::Private,
                },
                from: None,
                text: None,
            }),
            data: Some(data.to_string()),
        }),
    }
}

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
async fn group_chats_are_denied_silently() {
    let fx = fixture();
    let actions = fx
        .handler
        .handle_update(message_update(OWNER, CHAT, ChatKind::Group, "/run hi", 1))
        .await;
    assert!(actions.is_empty());

    let audit = fx.store.audit_log();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].decision, AuditDecision::Deny);
    assert_eq!(audit[0].reason.as_deref(), Some("group-or-non-private-chat"));
    assert!(fx.runs.requests.lock().is_empty());
}

#[tokio::test]
async fn non_owner_gets_exactly_one_denial_reply() {
    let fx = fixture();
    let actions = fx
        .handler
        .handle_update(message_update(77, CHAT, ChatKind::Private, "/run hi", 1))
        .await;

    let replies = reply_texts(&actions);
    assert_eq!(replies.len(), 1);
    assert!(replies[0].to_lowercase().contains("owner only"));

    let audit = fx.store.audit_log();
    assert_eq!(audit[0].decision, AuditDecision::Deny);
    assert_eq!(audit[0].reason.as_deref(), Some("non-owner"));
    assert!(fx.runs.requests.lock().is_empty());
}

#[tokio::test]
async fn duplicate_update_produces_no_actions() {
    let fx = fixture();
    let update = owner_text("/run hello");
    let first = fx.handler.handle_update(update.clone()).await;
    let second = fx.handler.handle_update(update).await;

    assert!(!first.is_empty());
    assert!(second.is_empty());
    assert_eq!(fx.runs.requests.lock().len(), 1);
}

#[tokio::test]
async fn run_command_uses_deterministic_idempotency_key() {
    let fx = fixture();
    let actions = fx
        .handler
        .handle_update(message_update(
            OWNER,
            CHAT,
            ChatKind::Private,
            "/run hello world",
            7,
        ))
        .await;

    let requests = fx.runs.requests.lock();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].idempotency_key, "tg:100:7");
    assert_eq!(requests[0].prompt, "hello world");
    // First configured project was selected automatically
    assert_eq!(requests[0].project_id, *"p1");

    let replies = reply_texts(&actions);
    assert!(replies[0].starts_with("Run queued: run-1"));

    let audit = fx.store.audit_log();
    let allow = audit
        .iter()
        .find(|e| e.decision == AuditDecision::Allow)
        .unwrap();
    assert_eq!(allow.command, "run");
    assert_eq!(allow.run_id.as_ref().map(|id| id.as_str()), Some("run-1"));
}

#[tokio::test]
async fn bare_text_is_a_run_command() {
    let fx = fixture();
    fx.handler.handle_update(owner_text("just do it")).await;
    let requests = fx.runs.requests.lock();
    assert_eq!(requests[0].prompt, "just do it");
}

#[tokio::test]
async fn kill_switch_denies_with_maintenance_reply() {
    let fx = fixture_with(|config| config.kill_switch_disable_runs = true);
    let actions = fx.handler.handle_update(owner_text("/run hi")).await;

    let replies = reply_texts(&actions);
    assert!(replies[0].to_lowercase().contains("maintenance mode"));
    assert!(fx.runs.requests.lock().is_empty());

    let audit = fx.store.audit_log();
    let deny = audit
        .iter()
        .find(|e| e.reason.as_deref() == Some("kill-switch"))
        .unwrap();
    assert_eq!(deny.decision, AuditDecision::Deny);
}

#[tokio::test]
async fn busy_session_yields_friendly_reply() {
    let fx = fixture();
    *fx.runs.session_busy.lock() = true;
    let actions = fx.handler.handle_update(owner_text("/run hi")).await;
    assert!(reply_texts(&actions)[0].contains("already active"));
}

#[tokio::test]
async fn use_project_switches_and_validates() {
    let fx = fixture();
    let actions = fx.handler.handle_update(owner_text("/use p2")).await;
    assert!(reply_texts(&actions)[0].contains("p2"));

    let actions = fx.handler.handle_update(owner_text("/use nope")).await;
    assert!(reply_texts(&actions)[0].contains("Unknown project"));

    // Runs now target p2
    fx.handler.handle_update(owner_text("/run hi")).await;
    assert_eq!(fx.runs.requests.lock()[0].project_id, *"p2");
}

#[tokio::test]
async fn newsession_creates_and_selects() {
    let fx = fixture();
    let actions = fx
        .handler
        .handle_update(owner_text("/newsession opencode review"))
        .await;
    assert!(reply_texts(&actions)[0].contains("review"));

    let session = fx.store.get_session(&"review".into()).unwrap();
    assert_eq!(session.provider, relay_core::EngineKind::OpenCode);
    assert_eq!(session.project_id, *"p1");
    // Session is owned by this chat
    let chat = fx.store.get_chat_by_external(CHAT).unwrap();
    assert_eq!(session.chat_id.as_ref(), Some(&chat.id));

    // Subsequent runs use it
    fx.handler.handle_update(owner_text("go")).await;
    assert_eq!(fx.runs.requests.lock()[0].session_id, *"review");
}

#[tokio::test]
async fn continue_sets_marker_and_optionally_runs() {
    let fx = fixture();
    fx.handler.handle_update(owner_text("/newsession claude work")).await;

    let actions = fx.handler.handle_update(owner_text("/continue")).await;
    assert!(!reply_texts(&actions).is_empty());
    assert_eq!(
        fx.store
            .get_session(&"work".into())
            .unwrap()
            .engine_session_id
            .as_deref(),
        Some(relay_core::CONTINUE_MARKER)
    );
    assert!(fx.runs.requests.lock().is_empty());

    fx.handler
        .handle_update(owner_text("/continue finish the report"))
        .await;
    assert_eq!(fx.runs.requests.lock().len(), 1);
}

#[tokio::test]
async fn attach_records_engine_session_id() {
    let fx = fixture();
    fx.handler.handle_update(owner_text("/newsession claude work")).await;
    fx.handler.handle_update(owner_text("/attach ses_abc")).await;
    assert_eq!(
        fx.store
            .get_session(&"work".into())
            .unwrap()
            .engine_session_id
            .as_deref(),
        Some("ses_abc")
    );
}

#[tokio::test]
async fn stop_cancels_the_active_run() {
    let fx = fixture();
    fx.handler.handle_update(owner_text("/newsession claude work")).await;
    fx.store
        .enqueue_run(
            test_support::run("run-9", "work", "k9"),
            test_support::job("job-9", "run-9"),
        )
        .unwrap();

    let actions = fx.handler.handle_update(owner_text("/stop")).await;
    assert!(reply_texts(&actions)[0].contains("run-9"));
    assert_eq!(
        fx.store.get_run(&"run-9".into()).unwrap().status,
        relay_core::RunStatus::Cancelled
    );
}

#[tokio::test]
async fn unsafe_mode_persists_and_banners_replies() {
    let fx = fixture();
    let actions = fx
        .handler
        .handle_update(owner_text("/enable_unsafe 30"))
        .await;
    assert!(reply_texts(&actions)[0].contains("Unsafe mode enabled"));

    let chat = fx.store.get_chat_by_external(CHAT).unwrap();
    assert_eq!(chat.unsafe_until, Some(1_000_000 + 30 * 60_000));

    // While active, replies carry the banner
    let actions = fx.handler.handle_update(owner_text("/current")).await;
    assert!(reply_texts(&actions)[0].starts_with("UNSAFE MODE (expires "));

    // After expiry the banner disappears
    fx.clock.advance(std::time::Duration::from_secs(31 * 60));
    let actions = fx.handler.handle_update(owner_text("/current")).await;
    assert!(!reply_texts(&actions)[0].starts_with("UNSAFE MODE"));
}

#[tokio::test]
async fn dashboard_renders_projects_and_controls() {
    let fx = fixture();
    let actions = fx.handler.handle_update(owner_text("/d")).await;
    let Some(Action::ReplyKeyboard { text, keyboard }) = actions.first() else {
        panic!("expected a keyboard reply, got {actions:?}");
    };
    assert!(text.contains("Project: p1"));
    let all_data: Vec<&str> = keyboard
        .iter()
        .flatten()
        .map(|b| b.callback_data.as_str())
        .collect();
    assert!(all_data.contains(&"proj:p1"));
    assert!(all_data.contains(&"proj:p2"));
    assert!(all_data.contains(&"unsafe:30"));
    assert!(all_data.contains(&"refresh"));
}

#[tokio::test]
async fn callback_switches_project_and_edits_in_place() {
    let fx = fixture();
    let actions = fx.handler.handle_update(callback_update("proj:p2")).await;

    let edit = actions
        .iter()
        .find_map(|a| match a {
            Action::EditKeyboard {
                message_id, text, ..
            } => Some((*message_id, text.clone())),
            _ => None,
        })
        .unwrap();
    assert_eq!(edit.0, 55);
    assert!(edit.1.contains("Project: p2"));
    assert!(actions
        .iter()
        .any(|a| matches!(a, Action::Toast { callback_id, .. } if callback_id == "cb1")));
}

#[tokio::test]
async fn callback_stop_run_cancels_without_touching_dashboard() {
    let fx = fixture();
    fx.store
        .create_session(test_support::session("s1", "p1"))
        .unwrap();
    fx.store
        .enqueue_run(
            test_support::run("run-3", "s1", "k3"),
            test_support::job("job-3", "run-3"),
        )
        .unwrap();

    let actions = fx
        .handler
        .handle_update(callback_update("stop_run:run-3"))
        .await;
    assert_eq!(
        fx.store.get_run(&"run-3".into()).unwrap().status,
        relay_core::RunStatus::Cancelled
    );
    assert!(!actions
        .iter()
        .any(|a| matches!(a, Action::EditKeyboard { .. })));
}

#[tokio::test]
async fn callback_model_updates_prefs() {
    let fx = fixture();
    fx.handler.handle_update(callback_update("model:opus")).await;
    let actions = fx.handler.handle_update(owner_text("/current")).await;
    assert!(reply_texts(&actions)[0].contains("Model: opus"));
}

#[tokio::test]
async fn non_owner_callback_is_dropped() {
    let fx = fixture();
    let mut update = callback_update("proj:p2");
    if let Some(query) = update.callback_query.as_mut() {
        query.from.id = 9;
    }
    let actions = fx.handler.handle_update(update).await;
    assert!(actions.is_empty());
}

#[tokio::test]
async fn get_refuses_path_escape() {
    let fx = fixture();
    // Point p1 at a real directory with a file in it
    let project_dir = tempfile::tempdir().unwrap();
    std::fs::write(project_dir.path().join("notes.txt"), "hi").unwrap();
    let mut project = test_support::project("p1");
    project.root_path = project_dir.path().to_path_buf();
    fx.store.upsert_project(project).unwrap();

    let actions = fx.handler.handle_update(owner_text("/get notes.txt")).await;
    assert!(actions
        .iter()
        .any(|a| matches!(a, Action::ReplyWithDocument { .. })));
    assert_eq!(fx.store.list_file_records().len(), 1);

    let actions = fx
        .handler
        .handle_update(owner_text("/get ../../etc/passwd"))
        .await;
    let replies = reply_texts(&actions);
    assert!(replies[0].contains("Refused") || replies[0].contains("not found"));
}

#[tokio::test]
async fn reload_projects_applies_delete_then_upsert() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("projects.json");
    std::fs::write(
        &config_path,
        r#"[{"id":"p2","name":"p2","rootPath":"/tmp/p2","defaultEngine":"opencode"}]"#,
    )
    .unwrap();

    let fx = fixture_with(|config| config.projects_config_path = Some(config_path));
    let actions = fx.handler.handle_update(owner_text("/reload_projects")).await;
    assert!(reply_texts(&actions)[0].contains("Reloaded 1"));

    let ids: Vec<String> = fx
        .store
        .list_projects()
        .iter()
        .map(|p| p.id.to_string())
        .collect();
    assert_eq!(ids, vec!["p2"]);
}

#[tokio::test]
async fn help_lists_commands() {
    let fx = fixture();
    let actions = fx.handler.handle_update(owner_text("/help")).await;
    let text = &reply_texts(&actions)[0];
    assert!(text.contains("/run"));
    assert!(text.contains("/enable_unsafe"));
}

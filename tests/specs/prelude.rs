// SPDX-License-Identifier: MIT

//! Shared fixture for the scenario suite.

use relay_chat::test_support::FakeTransport;
use relay_chat::transport::{ChatKind, ChatRef, ChatUpdate, IncomingMessage, UserRef};
use relay_chat::{ChatCommandHandler, HandlerConfig, RunStreamer, StreamerConfig};
use relay_core::{test_support, FakeClock, SequentialIdGen};
use relay_engine::test_support::ScriptedExecutor;
use relay_engine::{PrefsRegistry, RunOrchestrator};
use relay_storage::Store;
use std::sync::Arc;

pub const OWNER: i64 = 42;
pub const CHAT: i64 = 100;

pub type TestOrchestrator = RunOrchestrator<FakeClock, SequentialIdGen>;
pub type TestHandler = ChatCommandHandler<FakeClock, SequentialIdGen>;

pub struct World {
    pub _dir: tempfile::TempDir,
    pub store: Arc<Store>,
    pub clock: FakeClock,
    pub transport: FakeTransport,
    pub orchestrator: Arc<TestOrchestrator>,
    pub handler: TestHandler,
}

/// Build a world with one project and a scripted engine.
pub fn world(executor: ScriptedExecutor) -> World {
    world_with(executor, |_| {})
}

pub fn world_with(
    executor: ScriptedExecutor,
    tweak: impl FnOnce(&mut HandlerConfig),
) -> World {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path()).unwrap());
    store.upsert_project(test_support::project("p1")).unwrap();

    let clock = FakeClock::at(1_000_000);
    let transport = FakeTransport::new();
    let streamer = Arc::new(RunStreamer::new(
        transport.clone(),
        clock.clone(),
        StreamerConfig::default(),
    ));
    let orchestrator = Arc::new(RunOrchestrator::new(
        Arc::clone(&store),
        clock.clone(),
        SequentialIdGen::new("run"),
        Arc::new(executor),
        streamer,
    ));

    let mut config = HandlerConfig {
        owner_user_id: OWNER,
        kill_switch_disable_runs: false,
        projects_config_path: None,
    };
    tweak(&mut config);
    let handler = ChatCommandHandler::new(
        Arc::clone(&store),
        Arc::clone(&orchestrator) as Arc<dyn relay_engine::RunService>,
        clock.clone(),
        SequentialIdGen::new("gen"),
        PrefsRegistry::new(),
        config,
    );

    World {
        _dir: dir,
        store,
        clock,
        transport,
        orchestrator,
        handler,
    }
}

/// An owner message in the standard private chat.
pub fn owner_message(update_id: i64, message_id: i64, text: &str) -> ChatUpdate {
    message_from(update_id, message_id, OWNER, ChatKind::Private, text)
}

pub fn message_from(
    update_id: i64,
    message_id: i64,
    from: i64,
    kind: ChatKind,
    text: &str,
) -> ChatUpdate {
    ChatUpdate {
        update_id,
        message: Some(IncomingMessage {
            message_id,
            chat: ChatRef { id: CHAT, kind },
            from: Some(UserRef {
                id: from,
                username: None,
            }),
            text: Some(text.to_string()),
        }),
        callback_query: None,
    }
}

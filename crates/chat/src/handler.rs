// SPDX-License-Identifier: MIT

//! Chat command handler: owner gate, update dedupe, per-chat state and
//! command dispatch.
//!
//! The handler is a pure update → actions function over the store; the
//! transport executes the returned actions. Per-chat UI state (selected
//! project/session, engine, model) is process-local; anything that must
//! survive a restart (unsafe deadline, sessions, runs) lives in the
//! store.

use crate::dashboard;
use crate::transport::{Action, ChatKind, ChatUpdate, IncomingMessage, Keyboard};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use relay_core::{
    AuditDecision, AuditEntry, ChatRecord, Clock, EngineKind, IdGen, InboxUpdate, Project, RunId,
    Session, SessionId, SessionStatus, CONTINUE_MARKER,
};
use relay_engine::{EnginePrefs, EnqueueRequest, OrchestratorError, PrefsRegistry, RunService};
use relay_storage::Store;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct HandlerConfig {
    pub owner_user_id: i64,
    pub kill_switch_disable_runs: bool,
    /// Path re-read by `/reload_projects`.
    pub projects_config_path: Option<PathBuf>,
}

/// Process-local UI state for one external chat.
#[derive(Debug, Clone, Default)]
pub struct ChatUiState {
    pub project_id: Option<relay_core::ProjectId>,
    pub session_id: Option<SessionId>,
    pub engine: Option<EngineKind>,
    pub model: Option<String>,
    pub opencode_agent: Option<String>,
    pub unsafe_until: Option<u64>,
    pub last_run_id: Option<RunId>,
}

pub struct ChatCommandHandler<C: Clock, G: IdGen> {
    store: Arc<Store>,
    runs: Arc<dyn RunService>,
    clock: C,
    ids: G,
    prefs: PrefsRegistry,
    config: HandlerConfig,
    chat_state: Mutex<HashMap<i64, ChatUiState>>,
}

impl<C: Clock, G: IdGen> ChatCommandHandler<C, G> {
    pub fn new(
        store: Arc<Store>,
        runs: Arc<dyn RunService>,
        clock: C,
        ids: G,
        prefs: PrefsRegistry,
        config: HandlerConfig,
    ) -> Self {
        Self {
            store,
            runs,
            clock,
            ids,
            prefs,
            config,
            chat_state: Mutex::new(HashMap::new()),
        }
    }

    /// Process one inbound update into a list of actions.
    pub async fn handle_update(&self, update: ChatUpdate) -> Vec<Action> {
        let now = self.clock.epoch_ms();

        // 1-2. Gatekeeping, in order: chat type, then owner.
        if let Some(message) = &update.message {
            if message.chat.kind != ChatKind::Private {
                self.audit(
                    message.from.as_ref().map(|u| u.id),
                    message.chat.id,
                    "message",
                    None,
                    AuditDecision::Deny,
                    Some("group-or-non-private-chat"),
                );
                return Vec::new();
            }
            let from_id = message.from.as_ref().map(|u| u.id);
            if from_id != Some(self.config.owner_user_id) {
                self.audit(
                    from_id,
                    message.chat.id,
                    "message",
                    None,
                    AuditDecision::Deny,
                    Some("non-owner"),
                );
                return vec![Action::Reply {
                    text: "Access denied: owner only.".to_string(),
                }];
            }
        } else if let Some(query) = &update.callback_query {
            if query.from.id != self.config.owner_user_id {
                let chat_id = query.message.as_ref().map(|m| m.chat.id).unwrap_or(0);
                self.audit(
                    Some(query.from.id),
                    chat_id,
                    "callback",
                    None,
                    AuditDecision::Deny,
                    Some("non-owner"),
                );
                return Vec::new();
            }
        } else {
            return Vec::new();
        }

        // 3. First-writer-wins dedupe.
        let accepted = self
            .store
            .insert_inbox_update(InboxUpdate {
                update_id: update.update_id,
                chat_id: update.chat_id(),
                payload: serde_json::json!({
                    "kind": if update.message.is_some() { "message" } else { "callback" },
                }),
                received_at: now,
            })
            .unwrap_or(false);
        if !accepted {
            return Vec::new();
        }

        // 4. Dispatch with hydrated per-chat state.
        let actions = if let Some(message) = update.message {
            self.handle_message(&message, now).await
        } else if let Some(query) = update.callback_query {
            self.handle_callback(&query, now).await
        } else {
            Vec::new()
        };
        actions
    }

    async fn handle_message(&self, message: &IncomingMessage, now: u64) -> Vec<Action> {
        let chat_id = message.chat.id;
        self.hydrate(chat_id, now);

        let text = message.text.clone().unwrap_or_default();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }

        let actions = if let Some(rest) = trimmed.strip_prefix('/') {
            let mut parts = rest.splitn(2, char::is_whitespace);
            let command = parts.next().unwrap_or_default().to_ascii_lowercase();
            let arg = parts.next().map(str::trim).unwrap_or_default();
            self.dispatch_command(chat_id, message, &command, arg, now)
                .await
        } else {
            // Bare text is a run command.
            self.run_command(chat_id, message.message_id, trimmed, now)
                .await
        };
        self.decorate(chat_id, now, actions)
    }

    async fn dispatch_command(
        &self,
        chat_id: i64,
        message: &IncomingMessage,
        command: &str,
        arg: &str,
        now: u64,
    ) -> Vec<Action> {
        match command {
            "d" | "dashboard" => {
                let (text, keyboard) = self.render_dashboard(chat_id);
                vec![Action::ReplyKeyboard { text, keyboard }]
            }
            "projects" => vec![Action::Reply {
                text: self.projects_text(chat_id),
            }],
            "use" => self.use_project(chat_id, arg),
            "sessions" => vec![Action::Reply {
                text: self.sessions_text(chat_id),
            }],
            "newsession" => self.new_session(chat_id, arg, now),
            "use_session" => self.use_session(chat_id, arg),
            "engine" => self.set_engine(chat_id, arg),
            "run" => self.run_command(chat_id, message.message_id, arg, now).await,
            "continue" => self.continue_command(chat_id, message.message_id, arg, now).await,
            "attach" => self.attach_command(chat_id, arg),
            "stop" => self.stop_command(chat_id, now),
            "status" => vec![Action::Reply {
                text: self.status_text(chat_id),
            }],
            "current" => vec![Action::Reply {
                text: self.current_text(chat_id),
            }],
            "whoami" => vec![Action::Reply {
                text: format!(
                    "You are user {} (owner: yes).",
                    self.config.owner_user_id
                ),
            }],
            "enable_unsafe" => self.enable_unsafe(chat_id, arg, now),
            "uploads" => vec![Action::Reply {
                text: self.uploads_text(),
            }],
            "get" => self.get_file(chat_id, arg, now).await,
            "help" | "start" => vec![Action::Reply {
                text: help_text(),
            }],
            "reload_projects" => self.reload_projects(),
            other => vec![Action::Reply {
                text: format!("Unknown command: /{other}. Try /help."),
            }],
        }
    }

    // === Run path ===

    async fn run_command(
        &self,
        chat_id: i64,
        message_id: i64,
        prompt: &str,
        now: u64,
    ) -> Vec<Action> {
        if prompt.is_empty() {
            return vec![Action::Reply {
                text: "Usage: /run <prompt>".to_string(),
            }];
        }
        if self.config.kill_switch_disable_runs {
            self.audit(
                Some(self.config.owner_user_id),
                chat_id,
                "run",
                None,
                AuditDecision::Deny,
                Some("kill-switch"),
            );
            return vec![Action::Reply {
                text: "Maintenance mode: new runs are disabled.".to_string(),
            }];
        }

        let Some(project) = self.current_project(chat_id) else {
            return vec![Action::Reply {
                text: "No projects configured. Check the projects file.".to_string(),
            }];
        };
        let session = match self.ensure_session(chat_id, &project, now) {
            Ok(session) => session,
            Err(text) => return vec![Action::Reply { text }],
        };

        let request = EnqueueRequest {
            project_id: project.id.clone(),
            session_id: session.id.clone(),
            idempotency_key: format!("tg:{chat_id}:{message_id}"),
            prompt: prompt.to_string(),
        };
        match self.runs.enqueue(request).await {
            Ok(run) => {
                self.audit(
                    Some(self.config.owner_user_id),
                    chat_id,
                    "run",
                    Some(run.id.clone()),
                    AuditDecision::Allow,
                    None,
                );
                self.with_state(chat_id, |state| state.last_run_id = Some(run.id.clone()));
                vec![Action::Reply {
                    text: format!("Run queued: {}", run.id),
                }]
            }
            Err(OrchestratorError::SessionAlreadyActive(_)) => vec![Action::Reply {
                text: "A run is already active on this session. /stop it first.".to_string(),
            }],
            Err(e) => {
                tracing::error!(error = %e, "enqueue failed");
                vec![Action::Reply {
                    text: format!("Failed to queue run: {e}"),
                }]
            }
        }
    }

    async fn continue_command(
        &self,
        chat_id: i64,
        message_id: i64,
        prompt: &str,
        now: u64,
    ) -> Vec<Action> {
        match self.rebind_session(chat_id, Some(CONTINUE_MARKER.to_string()), now) {
            Ok(()) => {}
            Err(text) => return vec![Action::Reply { text }],
        }
        if prompt.is_empty() {
            return vec![Action::Reply {
                text: "Session will continue the engine's latest conversation.".to_string(),
            }];
        }
        self.run_command(chat_id, message_id, prompt, now).await
    }

    fn attach_command(&self, chat_id: i64, engine_session_id: &str) -> Vec<Action> {
        if engine_session_id.is_empty() {
            return vec![Action::Reply {
                text: "Usage: /attach <engine session id>".to_string(),
            }];
        }
        let now = self.clock.epoch_ms();
        match self.rebind_session(chat_id, Some(engine_session_id.to_string()), now) {
            Ok(()) => vec![Action::Reply {
                text: format!("Session attached to engine session {engine_session_id}."),
            }],
            Err(text) => vec![Action::Reply { text }],
        }
    }

    /// Point the current session at a different engine-side session.
    fn rebind_session(
        &self,
        chat_id: i64,
        engine_session_id: Option<String>,
        now: u64,
    ) -> Result<(), String> {
        let Some(project) = self.current_project(chat_id) else {
            return Err("No projects configured.".to_string());
        };
        let session = self.ensure_session(chat_id, &project, now)?;
        self.store
            .set_engine_session_id(&session.id, engine_session_id)
            .map_err(|e| format!("Failed to update session: {e}"))
    }

    fn stop_command(&self, chat_id: i64, now: u64) -> Vec<Action> {
        let session_id = self.with_state(chat_id, |state| state.session_id.clone());
        let Some(session_id) = session_id else {
            return vec![Action::Reply {
                text: "No session selected.".to_string(),
            }];
        };
        let Some(run) = self.store.find_active_run_by_session(&session_id) else {
            return vec![Action::Reply {
                text: "No active run on this session.".to_string(),
            }];
        };
        match self.store.cancel_run(&run.id, now) {
            Ok(true) => vec![Action::Reply {
                text: format!("Cancelling run {}.", run.id),
            }],
            Ok(false) => vec![Action::Reply {
                text: "Run already finished.".to_string(),
            }],
            Err(e) => vec![Action::Reply {
                text: format!("Failed to cancel: {e}"),
            }],
        }
    }

    // === Selection commands ===

    fn use_project(&self, chat_id: i64, project_id: &str) -> Vec<Action> {
        if project_id.is_empty() {
            return vec![Action::Reply {
                text: "Usage: /use <project id>".to_string(),
            }];
        }
        let Some(project) = self.store.get_project(&project_id.into()) else {
            return vec![Action::Reply {
                text: format!("Unknown project: {project_id}"),
            }];
        };
        self.with_state(chat_id, |state| {
            state.project_id = Some(project.id.clone());
            state.session_id = None;
            state.engine = Some(project.default_engine);
        });
        vec![Action::Reply {
            text: format!("Using project {} ({}).", project.id, project.name),
        }]
    }

    fn new_session(&self, chat_id: i64, arg: &str, now: u64) -> Vec<Action> {
        let mut parts = arg.split_whitespace();
        let engine = match parts.next() {
            Some(raw) => match raw.parse::<EngineKind>() {
                Ok(engine) => engine,
                Err(e) => return vec![Action::Reply { text: e }],
            },
            None => {
                return vec![Action::Reply {
                    text: "Usage: /newsession <claude|opencode> [name]".to_string(),
                }]
            }
        };
        let name = parts.next().map(str::to_string);

        let Some(project) = self.current_project(chat_id) else {
            return vec![Action::Reply {
                text: "No projects configured.".to_string(),
            }];
        };
        match self.create_session(chat_id, &project, engine, name, now) {
            Ok(session) => vec![Action::Reply {
                text: format!("Session {} created ({}).", session.id, session.provider),
            }],
            Err(text) => vec![Action::Reply { text }],
        }
    }

    fn use_session(&self, chat_id: i64, session_id: &str) -> Vec<Action> {
        if session_id.is_empty() {
            return vec![Action::Reply {
                text: "Usage: /use_session <session id>".to_string(),
            }];
        }
        let Some(session) = self.store.get_session(&session_id.into()) else {
            return vec![Action::Reply {
                text: format!("Unknown session: {session_id}"),
            }];
        };
        self.with_state(chat_id, |state| {
            state.session_id = Some(session.id.clone());
            state.project_id = Some(session.project_id.clone());
        });
        vec![Action::Reply {
            text: format!("Using session {}.", session.id),
        }]
    }

    fn set_engine(&self, chat_id: i64, arg: &str) -> Vec<Action> {
        match arg.parse::<EngineKind>() {
            Ok(engine) => {
                self.with_state(chat_id, |state| {
                    state.engine = Some(engine);
                    // New engine means the selected session no longer fits.
                    state.session_id = None;
                });
                vec![Action::Reply {
                    text: format!("Engine set to {engine}."),
                }]
            }
            Err(_) => vec![Action::Reply {
                text: "Usage: /engine <claude|opencode>".to_string(),
            }],
        }
    }

    fn enable_unsafe(&self, chat_id: i64, arg: &str, now: u64) -> Vec<Action> {
        let Ok(minutes) = arg.parse::<u64>() else {
            return vec![Action::Reply {
                text: "Usage: /enable_unsafe <minutes>".to_string(),
            }];
        };
        self.set_unsafe(chat_id, Some(now + minutes * 60_000))
    }

    fn set_unsafe(&self, chat_id: i64, until: Option<u64>) -> Vec<Action> {
        let Some(chat) = self.ensure_chat(chat_id) else {
            return vec![Action::Reply {
                text: "No projects configured.".to_string(),
            }];
        };
        if let Err(e) = self.store.set_unsafe_until(&chat.id, until) {
            return vec![Action::Reply {
                text: format!("Failed to update unsafe mode: {e}"),
            }];
        }
        self.with_state(chat_id, |state| state.unsafe_until = until);
        let text = match until {
            Some(until) => format!("Unsafe mode enabled until {}.", format_iso(until)),
            None => "Unsafe mode disabled.".to_string(),
        };
        vec![Action::Reply { text }]
    }

    // === Informational commands ===

    fn projects_text(&self, chat_id: i64) -> String {
        let projects = self.store.list_projects();
        if projects.is_empty() {
            return "No projects configured.".to_string();
        }
        let current = self.with_state(chat_id, |state| state.project_id.clone());
        let mut lines = vec!["Projects:".to_string()];
        for project in projects {
            let marker = if current.as_ref() == Some(&project.id) {
                "* "
            } else {
                "  "
            };
            lines.push(format!(
                "{marker}{} - {} [{}] {}",
                project.id,
                project.name,
                project.default_engine,
                project.root_path.display()
            ));
        }
        lines.join("\n")
    }

    fn sessions_text(&self, chat_id: i64) -> String {
        let Some(project) = self.current_project(chat_id) else {
            return "No projects configured.".to_string();
        };
        let sessions = self.store.list_sessions(&project.id);
        if sessions.is_empty() {
            return format!("No sessions in project {}.", project.id);
        }
        let current = self.with_state(chat_id, |state| state.session_id.clone());
        let mut lines = vec![format!("Sessions in {}:", project.id)];
        for session in sessions {
            let marker = if current.as_ref() == Some(&session.id) {
                "* "
            } else {
                "  "
            };
            let engine_session = session
                .engine_session_id
                .as_deref()
                .unwrap_or("-");
            lines.push(format!(
                "{marker}{} [{}] engine session: {engine_session}",
                session.id, session.provider
            ));
        }
        lines.join("\n")
    }

    fn status_text(&self, chat_id: i64) -> String {
        let (session_id, last_run_id) =
            self.with_state(chat_id, |state| (state.session_id.clone(), state.last_run_id.clone()));
        let run = session_id
            .as_ref()
            .and_then(|id| self.store.find_active_run_by_session(id))
            .or_else(|| last_run_id.as_ref().and_then(|id| self.store.get_run(id)));
        let Some(run) = run else {
            return "No runs yet.".to_string();
        };
        let mut text = format!("Run {}: {}", run.id, run.status);
        if let Some(summary) = &run.summary {
            text.push_str(&format!(
                " ({} tool calls, {} in {})",
                summary.tool_calls_count,
                summary.exit_status,
                relay_core::format_elapsed_ms(summary.duration_ms)
            ));
        }
        text
    }

    fn current_text(&self, chat_id: i64) -> String {
        let state = self.with_state(chat_id, |state| state.clone());
        let project = state
            .project_id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        let session = state
            .session_id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        let engine = state
            .engine
            .map(|e| e.to_string())
            .unwrap_or_else(|| "claude".to_string());
        let model = state.model.as_deref().unwrap_or("default");
        format!(
            "Project: {project}\nSession: {session}\nEngine: {engine}\nModel: {model}"
        )
    }

    fn uploads_text(&self) -> String {
        let files = self.store.list_file_records();
        if files.is_empty() {
            return "No file transfers recorded.".to_string();
        }
        let mut lines = vec!["Files:".to_string()];
        for file in files.iter().rev().take(20) {
            lines.push(format!(
                "  {:?} {} ({} bytes)",
                file.direction, file.original_name, file.size_bytes
            ));
        }
        lines.join("\n")
    }

    /// `/get <path>`: send a file from the current project, after a
    /// canonicalization check that it stays inside the project root.
    async fn get_file(&self, chat_id: i64, arg: &str, now: u64) -> Vec<Action> {
        if arg.is_empty() {
            return vec![Action::Reply {
                text: "Usage: /get <path within project>".to_string(),
            }];
        }
        let Some(project) = self.current_project(chat_id) else {
            return vec![Action::Reply {
                text: "No projects configured.".to_string(),
            }];
        };

        // Canonicalization, the read and the digest touch the
        // filesystem; keep them off the async workers so a large file
        // cannot stall update polling.
        let root = project.root_path.clone();
        let requested = arg.to_string();
        let resolved =
            tokio::task::spawn_blocking(move || read_project_file(root, &requested)).await;
        let file = match resolved {
            Ok(Ok(file)) => file,
            Ok(Err(text)) => return vec![Action::Reply { text }],
            Err(e) => {
                tracing::error!(error = %e, "file read task failed");
                return vec![Action::Reply {
                    text: format!("Failed to read {arg}"),
                }];
            }
        };

        let record = relay_core::FileRecord {
            id: self.ids.next(),
            direction: relay_core::FileDirection::Download,
            original_name: file
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| arg.to_string()),
            stored_rel_path: arg.to_string(),
            size_bytes: file.size_bytes,
            sha256: file.sha256,
            created_at: now,
        };
        if let Err(e) = self.store.insert_file_record(record) {
            tracing::warn!(error = %e, "failed to record file download");
        }
        vec![Action::ReplyWithDocument {
            path: file.path,
            caption: Some(arg.to_string()),
        }]
    }

    fn reload_projects(&self) -> Vec<Action> {
        let Some(path) = &self.config.projects_config_path else {
            return vec![Action::Reply {
                text: "No projects config path set.".to_string(),
            }];
        };
        let parsed: Result<Vec<Project>, String> = std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|raw| serde_json::from_str(&raw).map_err(|e| e.to_string()));
        match parsed {
            Ok(projects) => match self.store.reload_projects(&projects) {
                Ok(()) => vec![Action::Reply {
                    text: format!("Reloaded {} project(s).", projects.len()),
                }],
                Err(e) => vec![Action::Reply {
                    text: format!("Reload failed: {e}"),
                }],
            },
            Err(e) => vec![Action::Reply {
                text: format!("Could not read projects file: {e}"),
            }],
        }
    }

    // === State plumbing ===

    /// Load per-chat state, initializing project selection and engine on
    /// first access and re-reading the persisted unsafe deadline.
    fn hydrate(&self, chat_id: i64, now: u64) {
        let mut states = self.chat_state.lock();
        let state = states.entry(chat_id).or_default();
        if state.project_id.is_none() {
            if let Some(first) = self.store.list_projects().into_iter().next() {
                state.project_id = Some(first.id.clone());
                state.engine.get_or_insert(first.default_engine);
            }
        }
        let persisted = self
            .store
            .get_chat_by_external(chat_id)
            .and_then(|chat| chat.unsafe_until);
        state.unsafe_until = persisted.filter(|until| *until > now);
    }

    fn with_state<R>(&self, chat_id: i64, f: impl FnOnce(&mut ChatUiState) -> R) -> R {
        let mut states = self.chat_state.lock();
        f(states.entry(chat_id).or_default())
    }

    fn current_project(&self, chat_id: i64) -> Option<Project> {
        let selected = self.with_state(chat_id, |state| state.project_id.clone());
        match selected {
            Some(id) => self.store.get_project(&id),
            None => {
                let first = self.store.list_projects().into_iter().next()?;
                self.with_state(chat_id, |state| {
                    state.project_id = Some(first.id.clone());
                    state.engine.get_or_insert(first.default_engine);
                });
                Some(first)
            }
        }
    }

    /// The chat row backing this external chat, created on demand.
    fn ensure_chat(&self, chat_id: i64) -> Option<ChatRecord> {
        if let Some(chat) = self.store.get_chat_by_external(chat_id) {
            return Some(chat);
        }
        let project = self.current_project(chat_id)?;
        let chat = ChatRecord {
            id: self.ids.next().into(),
            project_id: project.id,
            external_chat_id: chat_id,
            unsafe_until: None,
        };
        match self.store.upsert_chat(chat.clone()) {
            Ok(()) => Some(chat),
            Err(e) => {
                tracing::error!(error = %e, "failed to create chat record");
                None
            }
        }
    }

    /// The session runs execute on: the selected one, the first in the
    /// project, or a fresh one owned by this chat.
    fn ensure_session(
        &self,
        chat_id: i64,
        project: &Project,
        now: u64,
    ) -> Result<Session, String> {
        let selected = self.with_state(chat_id, |state| state.session_id.clone());
        if let Some(id) = selected {
            if let Some(session) = self.store.get_session(&id) {
                return Ok(session);
            }
        }
        if let Some(session) = self.store.list_sessions(&project.id).into_iter().next() {
            self.with_state(chat_id, |state| state.session_id = Some(session.id.clone()));
            return Ok(session);
        }
        let engine = self
            .with_state(chat_id, |state| state.engine)
            .unwrap_or(project.default_engine);
        self.create_session(chat_id, project, engine, None, now)
    }

    fn create_session(
        &self,
        chat_id: i64,
        project: &Project,
        engine: EngineKind,
        name: Option<String>,
        _now: u64,
    ) -> Result<Session, String> {
        let chat = self.ensure_chat(chat_id);
        let session = Session {
            id: name.unwrap_or_else(|| self.ids.next()).into(),
            project_id: project.id.clone(),
            chat_id: chat.map(|c| c.id),
            provider: engine,
            engine_session_id: None,
            status: SessionStatus::Idle,
            prompt: String::new(),
        };
        self.store
            .create_session(session.clone())
            .map_err(|e| format!("Failed to create session: {e}"))?;
        self.with_state(chat_id, |state| {
            state.session_id = Some(session.id.clone());
            state.engine = Some(engine);
        });
        Ok(session)
    }

    /// Prefix user-visible texts with the unsafe banner while active.
    fn decorate(&self, chat_id: i64, now: u64, actions: Vec<Action>) -> Vec<Action> {
        let unsafe_until = self.with_state(chat_id, |state| state.unsafe_until);
        let Some(until) = unsafe_until.filter(|until| now < *until) else {
            return actions;
        };
        let banner = format!("UNSAFE MODE (expires {})\n\n", format_iso(until));
        actions
            .into_iter()
            .map(|action| match action {
                Action::Reply { text } => Action::Reply {
                    text: format!("{banner}{text}"),
                },
                Action::ReplyKeyboard { text, keyboard } => Action::ReplyKeyboard {
                    text: format!("{banner}{text}"),
                    keyboard,
                },
                Action::EditKeyboard {
                    message_id,
                    text,
                    keyboard,
                } => Action::EditKeyboard {
                    message_id,
                    text: format!("{banner}{text}"),
                    keyboard,
                },
                other => other,
            })
            .collect()
    }

    fn audit(
        &self,
        user_id: Option<i64>,
        chat_id: i64,
        command: &str,
        run_id: Option<RunId>,
        decision: AuditDecision,
        reason: Option<&str>,
    ) {
        let entry = AuditEntry {
            id: self.ids.next(),
            user_id,
            chat_id,
            command: command.to_string(),
            run_id,
            decision,
            reason: reason.map(String::from),
            created_at: self.clock.epoch_ms(),
        };
        if let Err(e) = self.store.append_audit(entry) {
            tracing::error!(error = %e, "failed to append audit entry");
        }
    }

    // === Dashboard and callbacks ===

    fn render_dashboard(&self, chat_id: i64) -> (String, Keyboard) {
        let state = self.with_state(chat_id, |state| state.clone());
        dashboard::render(&state, &self.store.list_projects(), self.clock.epoch_ms())
    }

    async fn handle_callback(
        &self,
        query: &crate::transport::CallbackQuery,
        now: u64,
    ) -> Vec<Action> {
        let Some(message) = &query.message else {
            return vec![Action::Toast {
                callback_id: query.id.clone(),
                text: None,
            }];
        };
        let chat_id = message.chat.id;
        let message_id = message.message_id;
        self.hydrate(chat_id, now);

        let data = query.data.clone().unwrap_or_default();
        let (toast, view) = self.apply_callback(chat_id, &data, now);

        let mut actions = Vec::new();
        if let Some((text, keyboard)) = view {
            actions.push(Action::EditKeyboard {
                message_id,
                text,
                keyboard,
            });
        }
        actions.push(Action::Toast {
            callback_id: query.id.clone(),
            text: toast,
        });
        self.decorate(chat_id, now, actions)
    }

    /// Apply one callback datum. Returns an optional toast and the view
    /// to edit the dashboard message into.
    #[allow(clippy::type_complexity)]
    fn apply_callback(
        &self,
        chat_id: i64,
        data: &str,
        now: u64,
    ) -> (Option<String>, Option<(String, Keyboard)>) {
        let dashboard_view = |handler: &Self| Some(handler.render_dashboard(chat_id));

        if let Some(project_id) = data.strip_prefix("proj:") {
            let actions = self.use_project(chat_id, project_id);
            let toast = reply_text(&actions);
            return (toast, dashboard_view(self));
        }
        if let Some(engine) = data.strip_prefix("engine:") {
            let actions = self.set_engine(chat_id, engine);
            return (reply_text(&actions), dashboard_view(self));
        }
        if let Some(session_id) = data.strip_prefix("session:") {
            let actions = self.use_session(chat_id, session_id);
            return (reply_text(&actions), dashboard_view(self));
        }
        if let Some(minutes) = data.strip_prefix("unsafe:") {
            let actions = self.enable_unsafe(chat_id, minutes, now);
            return (reply_text(&actions), dashboard_view(self));
        }
        if let Some(model) = data.strip_prefix("model:") {
            let model = (!model.is_empty()).then(|| model.to_string());
            self.with_state(chat_id, |state| state.model = model.clone());
            self.prefs
                .update(chat_id, |prefs: &mut EnginePrefs| prefs.model = model.clone());
            let toast = Some(match model {
                Some(m) => format!("Model set to {m}."),
                None => "Model reset to default.".to_string(),
            });
            return (toast, dashboard_view(self));
        }
        if let Some(agent) = data.strip_prefix("agent:") {
            let agent = (!agent.is_empty()).then(|| agent.to_string());
            self.with_state(chat_id, |state| state.opencode_agent = agent.clone());
            self.prefs
                .update(chat_id, |prefs: &mut EnginePrefs| {
                    prefs.opencode_agent = agent.clone()
                });
            return (Some("Agent updated.".to_string()), dashboard_view(self));
        }
        if let Some(session_id) = data.strip_prefix("clipeek:") {
            return (None, Some(self.clipeek_view(session_id)));
        }
        if let Some(engine_session_id) = data.strip_prefix("cliattach:") {
            let actions = self.attach_command(chat_id, engine_session_id);
            return (reply_text(&actions), dashboard_view(self));
        }
        if let Some(run_id) = data.strip_prefix("stop_run:") {
            let toast = match self.store.cancel_run(&run_id.into(), now) {
                Ok(true) => "Cancelling run.".to_string(),
                Ok(false) => "Run already finished.".to_string(),
                Err(e) => format!("Failed to cancel: {e}"),
            };
            // Progress messages are not the dashboard; leave them alone.
            return (Some(toast), None);
        }

        match data {
            "newsession" => {
                let toast = match self.current_project(chat_id) {
                    Some(project) => {
                        let engine = self
                            .with_state(chat_id, |state| state.engine)
                            .unwrap_or(project.default_engine);
                        match self.create_session(chat_id, &project, engine, None, now) {
                            Ok(session) => Some(format!("Session {} created.", session.id)),
                            Err(text) => Some(text),
                        }
                    }
                    None => Some("No projects configured.".to_string()),
                };
                (toast, dashboard_view(self))
            }
            "continue" => {
                let toast = match self.rebind_session(chat_id, Some(CONTINUE_MARKER.into()), now) {
                    Ok(()) => Some("Will continue the engine's latest conversation.".to_string()),
                    Err(text) => Some(text),
                };
                (toast, dashboard_view(self))
            }
            "sessions" => (None, Some(self.sessions_view(chat_id))),
            "clisessions" => (None, Some(self.clisessions_view(chat_id))),
            "models" => (None, Some(self.models_view(chat_id))),
            "unsafe_off" => {
                let actions = self.set_unsafe(chat_id, None);
                (reply_text(&actions), dashboard_view(self))
            }
            "refresh" | "back" => (None, dashboard_view(self)),
            other => {
                tracing::debug!(data = other, "unknown callback datum");
                (None, dashboard_view(self))
            }
        }
    }

    fn sessions_view(&self, chat_id: i64) -> (String, Keyboard) {
        let sessions = self
            .current_project(chat_id)
            .map(|project| self.store.list_sessions(&project.id))
            .unwrap_or_default();
        dashboard::sessions_menu(&sessions)
    }

    fn clisessions_view(&self, chat_id: i64) -> (String, Keyboard) {
        let sessions = self
            .current_project(chat_id)
            .map(|project| self.store.list_sessions(&project.id))
            .unwrap_or_default();
        dashboard::cli_sessions_menu(&sessions)
    }

    fn models_view(&self, chat_id: i64) -> (String, Keyboard) {
        let engine = self
            .with_state(chat_id, |state| state.engine)
            .unwrap_or(EngineKind::Claude);
        dashboard::models_menu(engine)
    }

    fn clipeek_view(&self, session_id: &str) -> (String, Keyboard) {
        let session = self.store.get_session(&session_id.into());
        dashboard::cli_peek(session.as_ref())
    }
}

/// A project file resolved and hashed for `/get`.
struct ProjectFile {
    path: PathBuf,
    size_bytes: u64,
    sha256: String,
}

/// Blocking half of `/get`: canonicalize inside the project root, read
/// and hash. Runs on a blocking thread.
fn read_project_file(root: PathBuf, requested: &str) -> Result<ProjectFile, String> {
    let Ok(canonical) = root.join(requested).canonicalize() else {
        return Err(format!("File not found: {requested}"));
    };
    let canonical_root = root.canonicalize().unwrap_or(root);
    if !canonical.starts_with(&canonical_root) {
        return Err("Refused: path escapes the project root.".to_string());
    }
    let bytes =
        std::fs::read(&canonical).map_err(|_| format!("Failed to read {requested}"))?;
    let digest = Sha256::digest(&bytes);
    Ok(ProjectFile {
        path: canonical,
        size_bytes: bytes.len() as u64,
        sha256: format!("{digest:x}"),
    })
}

/// First Reply text in a list of actions, for reuse as a toast.
fn reply_text(actions: &[Action]) -> Option<String> {
    actions.iter().find_map(|action| match action {
        Action::Reply { text } => Some(text.clone()),
        _ => None,
    })
}

fn format_iso(epoch_ms: u64) -> String {
    DateTime::<Utc>::from_timestamp_millis(epoch_ms as i64)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| epoch_ms.to_string())
}

fn help_text() -> String {
    [
        "relay - remote control for coding agents",
        "",
        "/d - dashboard",
        "/projects, /use <id> - select a project",
        "/sessions, /newsession <engine> [name], /use_session <id>",
        "/engine <claude|opencode> - engine for new sessions",
        "/run <prompt> - queue a run (bare text works too)",
        "/continue [prompt] - continue the engine's latest conversation",
        "/attach <engine session id> - bind to an engine session",
        "/stop - cancel the active run",
        "/status, /current, /whoami",
        "/enable_unsafe <minutes> - widen tool permissions temporarily",
        "/uploads, /get <path>",
        "/reload_projects - re-read the projects file",
    ]
    .join("\n")
}

#[cfg(test)]
#[path = "handler_tests.rs"]
mod tests;

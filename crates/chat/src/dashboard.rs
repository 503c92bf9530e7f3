// SPDX-License-Identifier: MIT

//! Dashboard and submenu rendering: text plus inline keyboard.

use crate::handler::ChatUiState;
use crate::transport::{Button, Keyboard};
use relay_core::{EngineKind, Project, Session};

/// Projects per keyboard row.
const PROJECTS_PER_ROW: usize = 3;

/// The main dashboard view.
pub fn render(state: &ChatUiState, projects: &[Project], now: u64) -> (String, Keyboard) {
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
    let engine = state.engine.unwrap_or(EngineKind::Claude);
    let model = state.model.as_deref().unwrap_or("default");
    let unsafe_line = match state.unsafe_until {
        Some(until) if until > now => "on",
        _ => "off",
    };

    let text = format!(
        "relay dashboard\nProject: {project}\nSession: {session}\nEngine: {engine}\nModel: {model}\nUnsafe: {unsafe_line}"
    );

    let mut keyboard: Keyboard = Vec::new();
    for chunk in projects.chunks(PROJECTS_PER_ROW) {
        keyboard.push(
            chunk
                .iter()
                .map(|p| {
                    let selected = state.project_id.as_ref() == Some(&p.id);
                    let label = if selected {
                        format!("✓ {}", p.id)
                    } else {
                        p.id.to_string()
                    };
                    Button::new(label, format!("proj:{}", p.id))
                })
                .collect(),
        );
    }

    let other_engine = match engine {
        EngineKind::Claude => EngineKind::OpenCode,
        EngineKind::OpenCode => EngineKind::Claude,
    };
    keyboard.push(vec![
        Button::new(
            format!("Engine: {engine} → {other_engine}"),
            format!("engine:{other_engine}"),
        ),
        Button::new("Model…", "models"),
    ]);
    keyboard.push(vec![
        Button::new("New session", "newsession"),
        Button::new("Sessions", "sessions"),
        Button::new("CLI sessions", "clisessions"),
    ]);
    keyboard.push(vec![
        Button::new("Unsafe 30m", "unsafe:30"),
        Button::new("Unsafe 60m", "unsafe:60"),
        Button::new("Unsafe off", "unsafe_off"),
    ]);
    keyboard.push(vec![Button::new("Refresh", "refresh")]);

    (text, keyboard)
}

/// Submenu listing the project's sessions as selectable buttons.
pub fn sessions_menu(sessions: &[Session]) -> (String, Keyboard) {
    let text = if sessions.is_empty() {
        "No sessions yet.".to_string()
    } else {
        "Pick a session:".to_string()
    };
    let mut keyboard: Keyboard = sessions
        .iter()
        .map(|session| {
            vec![Button::new(
                format!("{} [{}]", session.id, session.provider),
                format!("session:{}", session.id),
            )]
        })
        .collect();
    keyboard.push(vec![
        Button::new("Continue latest", "continue"),
        Button::new("Back", "back"),
    ]);
    (text, keyboard)
}

/// Submenu listing sessions with captured engine-side ids.
pub fn cli_sessions_menu(sessions: &[Session]) -> (String, Keyboard) {
    let attached: Vec<&Session> = sessions
        .iter()
        .filter(|session| session.captured_engine_session().is_some())
        .collect();
    let text = if attached.is_empty() {
        "No engine sessions captured yet.".to_string()
    } else {
        "Engine sessions:".to_string()
    };
    let mut keyboard: Keyboard = attached
        .iter()
        .map(|session| {
            vec![Button::new(
                format!("{} [{}]", session.id, session.provider),
                format!("clipeek:{}", session.id),
            )]
        })
        .collect();
    keyboard.push(vec![Button::new("Back", "back")]);
    (text, keyboard)
}

/// Detail view for one captured engine session.
pub fn cli_peek(session: Option<&Session>) -> (String, Keyboard) {
    let Some(session) = session else {
        return (
            "Session not found.".to_string(),
            vec![vec![Button::new("Back", "clisessions")]],
        );
    };
    let engine_session = session.captured_engine_session().unwrap_or("-");
    let text = format!(
        "Session {}\nProvider: {}\nEngine session: {engine_session}",
        session.id, session.provider
    );
    let mut keyboard: Keyboard = Vec::new();
    if let Some(id) = session.captured_engine_session() {
        keyboard.push(vec![Button::new("Attach here", format!("cliattach:{id}"))]);
    }
    keyboard.push(vec![Button::new("Back", "clisessions")]);
    (text, keyboard)
}

/// Model picker for the current engine.
pub fn models_menu(engine: EngineKind) -> (String, Keyboard) {
    let models: &[&str] = match engine {
        EngineKind::Claude => &["opus", "sonnet", "haiku"],
        EngineKind::OpenCode => &["anthropic/claude-sonnet-4-5", "openai/gpt-5"],
    };
    let mut keyboard: Keyboard = vec![vec![Button::new("Default", "model:")]];
    for model in models {
        keyboard.push(vec![Button::new(*model, format!("model:{model}"))]);
    }
    if engine == EngineKind::OpenCode {
        keyboard.push(vec![Button::new("Default agent", "agent:")]);
    }
    keyboard.push(vec![Button::new("Back", "back")]);
    (format!("Model for {engine}:"), keyboard)
}

#[cfg(test)]
#[path = "dashboard_tests.rs"]
mod tests;

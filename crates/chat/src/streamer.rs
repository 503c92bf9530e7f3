// SPDX-License-Identifier: MIT

//! Run streamer: coalesces the event stream into throttled progress
//! edits on one chat message, finalizing with the full text.

use crate::transport::{Button, Keyboard, MessageTransport};
use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::{format_elapsed_ms, Clock, EngineEvent, RunId, RunOutcome};
use relay_engine::{EventSink, RunFinish};
use std::collections::HashMap;

/// Telegram message length cap.
const MESSAGE_CAP: usize = 4096;

/// Characters of accumulated text shown in the progress preview.
const PREVIEW_CHARS: usize = 300;

/// Tool names shown in the progress header.
const TOOLS_SHOWN: usize = 3;

#[derive(Debug, Clone)]
pub struct StreamerConfig {
    /// Minimum time between progress edits.
    pub edit_interval_ms: u64,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            edit_interval_ms: 2_000,
        }
    }
}

#[derive(Debug, Default)]
struct ProgressState {
    progress_message_id: Option<i64>,
    started_at: u64,
    last_edit_at: u64,
    text_buffer: String,
    tool_names: Vec<String>,
}

pub struct RunStreamer<T: MessageTransport, C: Clock> {
    transport: T,
    clock: C,
    config: StreamerConfig,
    state: Mutex<HashMap<String, ProgressState>>,
}

impl<T: MessageTransport, C: Clock> RunStreamer<T, C> {
    pub fn new(transport: T, clock: C, config: StreamerConfig) -> Self {
        Self {
            transport,
            clock,
            config,
            state: Mutex::new(HashMap::new()),
        }
    }

    pub async fn handle_event(&self, chat_id: i64, run_id: &RunId, event: &EngineEvent) {
        let now = self.clock.epoch_ms();

        // Errors get their own message immediately.
        if let EngineEvent::Error { message, .. } = event {
            let _ = self
                .transport
                .send_message(chat_id, &friendly_error(message), None)
                .await;
            return;
        }

        let due = {
            let mut states = self.state.lock();
            let state = states.entry(run_id.to_string()).or_insert_with(|| {
                ProgressState {
                    started_at: now,
                    ..ProgressState::default()
                }
            });
            match event {
                EngineEvent::TextDelta { text, .. } => state.text_buffer.push_str(text),
                EngineEvent::ToolStart { tool_name, .. } => {
                    state.tool_names.push(tool_name.clone())
                }
                _ => {}
            }
            now.saturating_sub(state.last_edit_at) >= self.config.edit_interval_ms
        };
        if due {
            self.push_progress(chat_id, run_id, now).await;
        }
    }

    async fn push_progress(&self, chat_id: i64, run_id: &RunId, now: u64) {
        let (text, message_id) = {
            let mut states = self.state.lock();
            let Some(state) = states.get_mut(run_id.as_str()) else {
                return;
            };
            // Updated before the send so a slow transport cannot stack
            // up edits.
            state.last_edit_at = now;
            (progress_text(state, now), state.progress_message_id)
        };
        let keyboard: Keyboard = vec![vec![Button::new("Stop", format!("stop_run:{run_id}"))]];

        match message_id {
            None => {
                if let Ok(id) = self
                    .transport
                    .send_message(chat_id, &text, Some(&keyboard))
                    .await
                {
                    self.set_message_id(run_id, id);
                }
            }
            Some(id) => {
                let edited = self
                    .transport
                    .edit_message(chat_id, id, &text, Some(&keyboard))
                    .await;
                if edited.is_err() {
                    // Message may be gone or unchanged; start a fresh one.
                    if let Ok(new_id) = self
                        .transport
                        .send_message(chat_id, &text, Some(&keyboard))
                        .await
                    {
                        self.set_message_id(run_id, new_id);
                    }
                }
            }
        }
    }

    fn set_message_id(&self, run_id: &RunId, message_id: i64) {
        if let Some(state) = self.state.lock().get_mut(run_id.as_str()) {
            state.progress_message_id = Some(message_id);
        }
    }

    pub async fn finish_run(&self, chat_id: i64, run_id: &RunId, finish: &RunFinish) {
        let Some(state) = self.state.lock().remove(run_id.as_str()) else {
            // A run with no streamed events still gets its footer line.
            let footer = footer_line(finish);
            let _ = self.transport.send_message(chat_id, &footer, None).await;
            return;
        };

        let body = sanitize(&state.text_buffer);
        let footer = footer_line(finish);
        let full = if body.is_empty() {
            footer.clone()
        } else {
            format!("{body}\n\n{footer}")
        };

        if full.len() <= MESSAGE_CAP {
            self.deliver_final(chat_id, state.progress_message_id, &full)
                .await;
            return;
        }

        // Split on line boundaries; the first chunk replaces the
        // progress message, the rest are fresh sends.
        let chunks = split_chunks(&full, MESSAGE_CAP);
        let mut first = true;
        for chunk in chunks {
            if first {
                self.deliver_final(chat_id, state.progress_message_id, &chunk)
                    .await;
                first = false;
            } else {
                let _ = self.transport.send_message(chat_id, &chunk, None).await;
            }
        }
    }

    async fn deliver_final(&self, chat_id: i64, message_id: Option<i64>, text: &str) {
        match message_id {
            Some(id) => {
                if self
                    .transport
                    .edit_message(chat_id, id, text, None)
                    .await
                    .is_err()
                {
                    let _ = self.transport.send_message(chat_id, text, None).await;
                }
            }
            None => {
                let _ = self.transport.send_message(chat_id, text, None).await;
            }
        }
    }
}

#[async_trait]
impl<T: MessageTransport, C: Clock> EventSink for RunStreamer<T, C> {
    async fn on_event(&self, chat_id: Option<i64>, run_id: &RunId, event: &EngineEvent) {
        if let Some(chat_id) = chat_id {
            self.handle_event(chat_id, run_id, event).await;
        }
    }

    async fn on_finished(&self, chat_id: Option<i64>, run_id: &RunId, finish: &RunFinish) {
        if let Some(chat_id) = chat_id {
            self.finish_run(chat_id, run_id, finish).await;
        }
    }
}

fn progress_text(state: &ProgressState, now: u64) -> String {
    let elapsed = format_elapsed_ms(now.saturating_sub(state.started_at));
    let mut text = format!("Working... ({elapsed})");
    if !state.tool_names.is_empty() {
        let start = state.tool_names.len().saturating_sub(TOOLS_SHOWN);
        text.push_str(&format!("\nTools: {}", state.tool_names[start..].join(", ")));
    }
    let preview = tail_chars(state.text_buffer.trim(), PREVIEW_CHARS);
    if !preview.is_empty() {
        text.push_str("\n\n");
        text.push_str(&preview);
    }
    text
}

fn footer_line(finish: &RunFinish) -> String {
    let icon = match finish.status {
        RunOutcome::Success => "✅",
        RunOutcome::Error => "❌",
        RunOutcome::Cancelled => "🛑",
        RunOutcome::Unknown => "❔",
    };
    format!("[{icon} in {}]", format_elapsed_ms(finish.duration_ms))
}

/// Last `n` characters, on a char boundary.
fn tail_chars(text: &str, n: usize) -> String {
    let count = text.chars().count();
    if count <= n {
        return text.to_string();
    }
    text.chars().skip(count - n).collect()
}

/// Strip ASCII control characters except tab/LF/CR, and trim.
fn sanitize(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_ascii_control() || matches!(c, '\t' | '\n' | '\r'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Split into chunks of at most `cap` bytes, preferring the last
/// newline inside the window, falling back to a hard cut.
fn split_chunks(text: &str, cap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut rest = text;
    while rest.len() > cap {
        let window = &rest[..floor_boundary(rest, cap)];
        let cut = match window.rfind('\n') {
            Some(pos) if pos > 0 => pos,
            _ => window.len(),
        };
        chunks.push(rest[..cut].trim_end().to_string());
        rest = rest[cut..].trim_start_matches('\n');
    }
    if !rest.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

fn floor_boundary(text: &str, mut index: usize) -> usize {
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Translate known engine failure categories into a friendlier line.
fn friendly_error(message: &str) -> String {
    let lower = message.to_lowercase();
    let has = |patterns: &[&str]| patterns.iter().any(|p| lower.contains(p));
    let hint = if has(&["rate limit", "too many requests"]) {
        Some("Rate limited - wait a bit and retry.")
    } else if has(&["unauthorized", "invalid api key", "authentication"]) {
        Some("Engine is not authenticated. Log in on the host.")
    } else if has(&["quota", "credit", "billing"]) {
        Some("Out of credits or quota.")
    } else if has(&["timeout", "timed out"]) {
        Some("The engine timed out.")
    } else if has(&["overloaded", "overload"]) {
        Some("Provider is overloaded - retry shortly.")
    } else {
        None
    };
    match hint {
        Some(hint) => format!("Run error: {message}\n{hint}"),
        None => format!("Run error: {message}"),
    }
}

#[cfg(test)]
#[path = "streamer_tests.rs"]
mod tests;

// SPDX-License-Identifier: MIT

//! Parser for `opencode run --format json` event lines.
//!
//! OpenCode's event naming drifts between releases, so matching is
//! permissive: type names are lowercased and underscore-normalized, and
//! payload fields are probed under the spellings seen in the wild.

use super::{find_session_id, get_str, parse_line, EngineParser, ParsedLine};
use crate::framer::LineFramer;
use relay_core::{EngineEvent, RunOutcome};
use serde_json::Value;

#[derive(Default)]
pub struct OpenCodeParser {
    framer: LineFramer,
    session_id: Option<String>,
    malformed: u64,
    finished: bool,
}

impl OpenCodeParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle_line(&mut self, line: &str, out: &mut Vec<EngineEvent>) {
        let record = match parse_line(line) {
            ParsedLine::Skip => return,
            ParsedLine::Malformed => {
                self.malformed += 1;
                return;
            }
            ParsedLine::Record(value) => value,
        };

        if let Some(id) = find_session_id(&record) {
            self.session_id = Some(id);
        }

        let Some(raw_type) = get_str(&record, "type") else {
            return;
        };
        let kind = normalize_type(raw_type);

        match kind.as_str() {
            "started" | "run_started" | "run_start" => {
                out.push(EngineEvent::RunStarted {
                    run_id: None,
                    timestamp: None,
                });
            }
            "text" | "text_delta" | "message_delta" | "output_text_delta" => {
                if let Some(text) = extract_text(&record) {
                    out.push(EngineEvent::TextDelta {
                        text,
                        channel: None,
                    });
                }
            }
            "tool_use" => self.handle_tool_use(&record, out),
            "step_start" | "step_finish" => {}
            "finished" | "completed" | "run_finished" | "run_end" => {
                if !self.finished {
                    self.finished = true;
                    out.push(EngineEvent::RunFinished {
                        status: extract_status(&record),
                    });
                }
            }
            "file_uploaded" | "upload_completed" => {
                out.push(file_event(&record, true));
            }
            "file_downloaded" | "download_completed" => {
                out.push(file_event(&record, false));
            }
            "error" => {
                out.push(EngineEvent::Error {
                    message: extract_text(&record)
                        .unwrap_or_else(|| "opencode error".to_string()),
                    code: get_str(&record, "code").map(String::from),
                });
            }
            other if other.starts_with("tool_start") || other.starts_with("tool_started") => {
                out.push(EngineEvent::ToolStart {
                    tool_name: extract_tool_name(&record),
                    call_id: extract_call_id(&record),
                    input: None,
                });
            }
            other if other.starts_with("tool_end") || other.starts_with("tool_call_") => {
                out.push(EngineEvent::ToolEnd {
                    tool_name: extract_tool_name(&record),
                    call_id: extract_call_id(&record),
                    output: None,
                });
            }
            // Unknown discriminator: not an event.
            _ => {}
        }
    }

    /// `tool_use` carries a state machine: pending (or no state) means
    /// the call is starting, anything else means it finished.
    fn handle_tool_use(&mut self, record: &Value, out: &mut Vec<EngineEvent>) {
        let state = record.get("part").and_then(|p| p.get("state"));
        let status = state.and_then(|s| get_str(s, "status"));

        let starting = matches!(status, Some("pending") | None);
        if starting {
            out.push(EngineEvent::ToolStart {
                tool_name: extract_tool_name(record),
                call_id: extract_call_id(record),
                input: state.and_then(|s| s.get("input")).cloned(),
            });
        } else {
            let output = state
                .and_then(|s| s.get("output").filter(|v| !v.is_null()).cloned())
                .or_else(|| state.and_then(|s| s.get("error").filter(|v| !v.is_null()).cloned()));
            out.push(EngineEvent::ToolEnd {
                tool_name: extract_tool_name(record),
                call_id: extract_call_id(record),
                output,
            });
        }
    }
}

/// Lowercase and underscore-normalize an event type name.
fn normalize_type(raw: &str) -> String {
    raw.trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c == '-' || c == '.' || c == ' ' { '_' } else { c })
        .collect()
}

/// Text may live under `part.text`, `text`, `delta`, `content`, or
/// `message`.
fn extract_text(record: &Value) -> Option<String> {
    if let Some(text) = record.get("part").and_then(|p| get_str(p, "text")) {
        return Some(text.to_string());
    }
    for key in ["text", "delta", "content", "message"] {
        if let Some(text) = get_str(record, key) {
            return Some(text.to_string());
        }
    }
    None
}

fn extract_tool_name(record: &Value) -> String {
    let part = record.get("part");
    part.and_then(|p| get_str(p, "tool"))
        .or_else(|| part.and_then(|p| get_str(p, "name")))
        .or_else(|| get_str(record, "tool"))
        .or_else(|| get_str(record, "name"))
        .unwrap_or("unknown")
        .to_string()
}

fn extract_call_id(record: &Value) -> Option<String> {
    let part = record.get("part");
    part.and_then(|p| get_str(p, "callID"))
        .or_else(|| part.and_then(|p| get_str(p, "call_id")))
        .or_else(|| part.and_then(|p| get_str(p, "id")))
        .or_else(|| get_str(record, "call_id"))
        .map(String::from)
}

fn extract_status(record: &Value) -> RunOutcome {
    match get_str(record, "status") {
        Some("error") | Some("failed") => RunOutcome::Error,
        Some("cancelled") | Some("canceled") | Some("aborted") => RunOutcome::Cancelled,
        Some("success") | Some("completed") | None => RunOutcome::Success,
        Some(_) => RunOutcome::Unknown,
    }
}

fn file_event(record: &Value, upload: bool) -> EngineEvent {
    let part = record.get("part");
    let probe = |keys: &[&str]| {
        keys.iter()
            .find_map(|key| {
                get_str(record, key).or_else(|| part.and_then(|p| get_str(p, key)))
            })
            .map(String::from)
    };
    let file_path = probe(&["filePath", "path"]);
    let file_name = probe(&["fileName", "name"]);
    let url = probe(&["url"]);
    let size_bytes = ["sizeBytes", "size"].iter().find_map(|key| {
        record
            .get(key)
            .or_else(|| part.and_then(|p| p.get(key)))
            .and_then(Value::as_u64)
    });

    if upload {
        EngineEvent::FileUploaded {
            file_path,
            file_name,
            size_bytes,
            url,
        }
    } else {
        EngineEvent::FileDownloaded {
            file_path,
            file_name,
            size_bytes,
            url,
        }
    }
}

impl EngineParser for OpenCodeParser {
    fn push(&mut self, chunk: &[u8]) -> Vec<EngineEvent> {
        let mut out = Vec::new();
        for line in self.framer.push(chunk) {
            self.handle_line(&line, &mut out);
        }
        out
    }

    fn finish(&mut self, status: RunOutcome) -> Vec<EngineEvent> {
        let mut out = Vec::new();
        for line in self.framer.flush() {
            self.handle_line(&line, &mut out);
        }
        if !self.finished {
            self.finished = true;
            out.push(EngineEvent::RunFinished { status });
        }
        out
    }

    fn engine_session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    fn malformed_lines(&self) -> u64 {
        self.malformed
    }
}

#[cfg(test)]
#[path = "opencode_tests.rs"]
mod tests;

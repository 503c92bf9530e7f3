// SPDX-License-Identifier: MIT

//! Parser for `claude --output-format stream-json` lines.

use super::{find_session_id, get_str, parse_line, stringify_for_error, EngineParser, ParsedLine};
use crate::framer::LineFramer;
use relay_core::{EngineEvent, RunOutcome};
use serde_json::Value;

/// Cap on stringified fallback error messages.
const ERROR_TEXT_CAP: usize = 400;

#[derive(Default)]
pub struct ClaudeParser {
    framer: LineFramer,
    session_id: Option<String>,
    malformed: u64,
    finished: bool,
}

impl ClaudeParser {
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

        match get_str(&record, "type") {
            Some("system") => {
                if get_str(&record, "subtype") == Some("init") {
                    out.push(EngineEvent::EngineMeta {
                        engine: Some("claude".to_string()),
                        model: get_str(&record, "model").map(String::from),
                        metadata: Some(record.clone()),
                    });
                }
            }
            Some("stream_event") => self.handle_stream_event(&record, out),
            Some("assistant") => self.handle_assistant(&record, out),
            Some("result") => self.handle_result(&record, out),
            Some("error") => out.push(EngineEvent::Error {
                message: best_error_message(&record),
                code: get_str(&record, "code").map(String::from),
            }),
            // Unrecognized structure: not an event, discard.
            _ => {}
        }
    }

    fn handle_stream_event(&mut self, record: &Value, out: &mut Vec<EngineEvent>) {
        let Some(event) = record.get("event") else {
            return;
        };
        match get_str(event, "type") {
            Some("content_block_delta") => {
                let Some(delta) = event.get("delta") else {
                    return;
                };
                if get_str(delta, "type") == Some("text_delta") {
                    if let Some(text) = get_str(delta, "text") {
                        out.push(EngineEvent::TextDelta {
                            text: text.to_string(),
                            channel: None,
                        });
                    }
                }
            }
            Some("content_block_start") => {
                let Some(block) = event.get("content_block") else {
                    return;
                };
                if get_str(block, "type") == Some("tool_use") {
                    if let Some(name) = get_str(block, "name") {
                        out.push(EngineEvent::ToolStart {
                            tool_name: name.to_string(),
                            call_id: get_str(block, "id").map(String::from),
                            input: None,
                        });
                    }
                }
            }
            _ => {}
        }
    }

    /// Assistant messages report tool_use blocks whose input has already
    /// been executed upstream; surface them as completed calls.
    fn handle_assistant(&mut self, record: &Value, out: &mut Vec<EngineEvent>) {
        let blocks = record
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_array);
        let Some(blocks) = blocks else {
            return;
        };
        for block in blocks {
            if get_str(block, "type") != Some("tool_use") {
                continue;
            }
            let Some(name) = get_str(block, "name") else {
                continue;
            };
            out.push(EngineEvent::ToolEnd {
                tool_name: name.to_string(),
                call_id: get_str(block, "id").map(String::from),
                output: block.get("input").cloned(),
            });
        }
    }

    fn handle_result(&mut self, record: &Value, out: &mut Vec<EngineEvent>) {
        let is_error = record
            .get("is_error")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let subtype = get_str(record, "subtype").unwrap_or("");
        let status = if is_error || subtype.starts_with("error") {
            RunOutcome::Error
        } else if subtype == "success" {
            RunOutcome::Success
        } else {
            RunOutcome::Unknown
        };

        if status == RunOutcome::Error {
            out.push(EngineEvent::Error {
                message: best_error_message(record),
                code: None,
            });
        }
        if !self.finished {
            self.finished = true;
            out.push(EngineEvent::RunFinished { status });
        }
    }
}

/// Best-available error text: `result`, `error`, `message`, `body`, or a
/// truncated stringification of the whole record.
fn best_error_message(record: &Value) -> String {
    for key in ["result", "error", "message", "body"] {
        match record.get(key) {
            Some(Value::String(s)) if !s.is_empty() => return s.clone(),
            Some(nested @ Value::Object(_)) => {
                if let Some(msg) = get_str(nested, "message") {
                    return msg.to_string();
                }
            }
            _ => {}
        }
    }
    stringify_for_error(record, ERROR_TEXT_CAP)
}

impl EngineParser for ClaudeParser {
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
#[path = "claude_tests.rs"]
mod tests;

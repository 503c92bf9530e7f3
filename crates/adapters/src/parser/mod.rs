// SPDX-License-Identifier: MIT

//! Engine output parsers.
//!
//! Each engine speaks its own JSON-lines dialect; a parser reduces it to
//! the normalized event union. Shared invariants:
//!
//! - at most one `run_finished` per parser lifetime - later terminal
//!   inputs are dropped, and `finish()` synthesizes one if none was seen;
//! - malformed JSON lines are counted, never fatal; blank lines and
//!   unrecognized structures are skipped silently;
//! - the latest engine session id seen in any line is retained.

mod claude;
mod opencode;

pub use claude::ClaudeParser;
pub use opencode::OpenCodeParser;

use relay_core::{EngineEvent, RunOutcome};
use serde_json::Value;

/// Streaming parser over an engine's stdout byte stream.
pub trait EngineParser: Send + 'static {
    /// Feed a chunk; returns the events completed by it.
    fn push(&mut self, chunk: &[u8]) -> Vec<EngineEvent>;

    /// Flush the tail and guarantee a terminal event: if the stream
    /// never produced `run_finished`, one is synthesized with `status`.
    fn finish(&mut self, status: RunOutcome) -> Vec<EngineEvent>;

    /// Latest engine-assigned session id observed, if any.
    fn engine_session_id(&self) -> Option<&str>;

    /// Count of JSON-level parse failures so far.
    fn malformed_lines(&self) -> u64;
}

/// Outcome of parsing one framed line.
enum ParsedLine {
    Skip,
    Malformed,
    Record(Value),
}

fn parse_line(line: &str) -> ParsedLine {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ParsedLine::Skip;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) if value.is_object() => ParsedLine::Record(value),
        // Valid JSON scalars are not engine records; discard silently.
        Ok(_) => ParsedLine::Skip,
        Err(_) => ParsedLine::Malformed,
    }
}

fn get_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

/// Search a record for an engine session id under any of the spellings
/// the engines use (`session_id`, `sessionID`, `sessionId`), walking
/// nested objects depth-first.
fn find_session_id(value: &Value) -> Option<String> {
    const KEYS: [&str; 3] = ["session_id", "sessionID", "sessionId"];
    match value {
        Value::Object(map) => {
            for key in KEYS {
                if let Some(id) = map.get(key).and_then(Value::as_str) {
                    return Some(id.to_string());
                }
            }
            map.values().find_map(find_session_id)
        }
        Value::Array(items) => items.iter().find_map(find_session_id),
        _ => None,
    }
}

/// Render an arbitrary JSON value as an error message, truncated.
fn stringify_for_error(value: &Value, max_len: usize) -> String {
    let mut text = value.to_string();
    if text.len() > max_len {
        let mut end = max_len;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
        text.push_str("...");
    }
    text
}

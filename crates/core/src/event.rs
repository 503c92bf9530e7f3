// SPDX-License-Identifier: MIT

//! Normalized engine event union.
//!
//! Every engine adapter reduces its own line format to this closed set.
//! The JSON shape (tagged by `type`, camelCase fields) is the wire and
//! persistence format for run events.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal status of a run as reported by the engine or the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Success,
    Error,
    Cancelled,
    Unknown,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunOutcome::Success => "success",
            RunOutcome::Error => "error",
            RunOutcome::Cancelled => "cancelled",
            RunOutcome::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A normalized event emitted by an engine parser.
///
/// Unrecognized engine structures are not represented here: parsers drop
/// them silently. Optional fields that some engines supply and others do
/// not are `Option` and omitted from JSON when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    #[serde(rename_all = "camelCase")]
    RunStarted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    EngineMeta {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        engine: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
    },
    #[serde(rename_all = "camelCase")]
    TextDelta {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ToolStart {
        tool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<serde_json::Value>,
    },
    #[serde(rename_all = "camelCase")]
    ToolEnd {
        tool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<serde_json::Value>,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    RunFinished { status: RunOutcome },
    #[serde(rename_all = "camelCase")]
    FileUploaded {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size_bytes: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    FileDownloaded {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size_bytes: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
}

impl EngineEvent {
    /// The `type` discriminator as persisted.
    pub fn event_type(&self) -> &'static str {
        match self {
            EngineEvent::RunStarted { .. } => "run_started",
            EngineEvent::EngineMeta { .. } => "engine_meta",
            EngineEvent::TextDelta { .. } => "text_delta",
            EngineEvent::ToolStart { .. } => "tool_start",
            EngineEvent::ToolEnd { .. } => "tool_end",
            EngineEvent::Error { .. } => "error",
            EngineEvent::RunFinished { .. } => "run_finished",
            EngineEvent::FileUploaded { .. } => "file_uploaded",
            EngineEvent::FileDownloaded { .. } => "file_downloaded",
        }
    }

    /// True for the terminal `run_finished` event.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EngineEvent::RunFinished { .. })
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;

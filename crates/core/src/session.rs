// SPDX-License-Identifier: MIT

//! Session record: a persistent conversation thread within a project.

use crate::engine::EngineKind;
use crate::id::{ChatId, ProjectId, SessionId};
use serde::{Deserialize, Serialize};

/// Sentinel stored in `engine_session_id` to request `--continue`
/// (resume the engine's most recent session) instead of an explicit id.
pub const CONTINUE_MARKER: &str = "__continue__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Active,
}

/// A conversation session.
///
/// `engine_session_id` is absent for a fresh session, the
/// [`CONTINUE_MARKER`] sentinel, or an engine-assigned id captured from
/// the event stream of a previous run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub project_id: ProjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<ChatId>,
    pub provider: EngineKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_session_id: Option<String>,
    pub status: SessionStatus,
    /// Last prompt submitted on this session.
    #[serde(default)]
    pub prompt: String,
}

impl Session {
    /// Whether the next run should pass `--continue` to the engine.
    pub fn wants_continue(&self) -> bool {
        self.engine_session_id.as_deref() == Some(CONTINUE_MARKER)
    }

    /// The captured engine session id, if one is recorded (the continue
    /// marker does not count).
    pub fn captured_engine_session(&self) -> Option<&str> {
        match self.engine_session_id.as_deref() {
            Some(CONTINUE_MARKER) | None => None,
            Some(id) => Some(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(engine_session_id: Option<&str>) -> Session {
        Session {
            id: "s1".into(),
            project_id: "p1".into(),
            chat_id: None,
            provider: EngineKind::Claude,
            engine_session_id: engine_session_id.map(String::from),
            status: SessionStatus::Idle,
            prompt: String::new(),
        }
    }

    #[test]
    fn continue_marker_is_not_a_captured_id() {
        let s = session(Some(CONTINUE_MARKER));
        assert!(s.wants_continue());
        assert_eq!(s.captured_engine_session(), None);
    }

    #[test]
    fn explicit_id_is_captured() {
        let s = session(Some("abc-123"));
        assert!(!s.wants_continue());
        assert_eq!(s.captured_engine_session(), Some("abc-123"));
    }
}

// SPDX-License-Identifier: MIT

//! Fakes for handler/streamer tests here and in the scenario suite.

use crate::transport::{Keyboard, MessageTransport, TransportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::{Run, RunStatus};
use relay_engine::{EnqueueRequest, OrchestratorError, RunService};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub chat_id: i64,
    pub message_id: i64,
    pub text: String,
    pub keyboard: Option<Keyboard>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditedMessage {
    pub chat_id: i64,
    pub message_id: i64,
    pub text: String,
}

#[derive(Default)]
struct FakeTransportState {
    next_message_id: i64,
    sent: Vec<SentMessage>,
    edits: Vec<EditedMessage>,
    documents: Vec<(i64, PathBuf)>,
    callbacks: Vec<(String, Option<String>)>,
    fail_edits: bool,
}

/// Transport double that records every call.
#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<FakeTransportState>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `edit_message` call fail (fallback-path testing).
    pub fn fail_edits(&self, fail: bool) {
        self.state.lock().fail_edits = fail;
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.state.lock().sent.clone()
    }

    pub fn edits(&self) -> Vec<EditedMessage> {
        self.state.lock().edits.clone()
    }

    pub fn documents(&self) -> Vec<(i64, PathBuf)> {
        self.state.lock().documents.clone()
    }

    pub fn callbacks(&self) -> Vec<(String, Option<String>)> {
        self.state.lock().callbacks.clone()
    }
}

#[async_trait]
impl MessageTransport for FakeTransport {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<i64, TransportError> {
        let mut state = self.state.lock();
        state.next_message_id += 1;
        let message_id = state.next_message_id;
        state.sent.push(SentMessage {
            chat_id,
            message_id,
            text: text.to_string(),
            keyboard: keyboard.cloned(),
        });
        Ok(message_id)
    }

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        _keyboard: Option<&Keyboard>,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.fail_edits {
            return Err(TransportError::EditRejected("message not found".into()));
        }
        state.edits.push(EditedMessage {
            chat_id,
            message_id,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_document(
        &self,
        chat_id: i64,
        path: &Path,
        _caption: Option<&str>,
    ) -> Result<i64, TransportError> {
        let mut state = self.state.lock();
        state.next_message_id += 1;
        state.documents.push((chat_id, path.to_path_buf()));
        Ok(state.next_message_id)
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
    ) -> Result<(), TransportError> {
        self.state
            .lock()
            .callbacks
            .push((callback_id.to_string(), text.map(String::from)));
        Ok(())
    }
}

/// Run service double recording enqueue requests.
#[derive(Default)]
pub struct FakeRunService {
    pub requests: Mutex<Vec<EnqueueRequest>>,
    /// When set, every enqueue fails with `SessionAlreadyActive`.
    pub session_busy: Mutex<bool>,
}

#[async_trait]
impl RunService for FakeRunService {
    async fn enqueue(&self, req: EnqueueRequest) -> Result<Run, OrchestratorError> {
        if *self.session_busy.lock() {
            return Err(OrchestratorError::SessionAlreadyActive(
                req.session_id.clone(),
            ));
        }
        let mut requests = self.requests.lock();
        let run = Run {
            id: format!("run-{}", requests.len() + 1).into(),
            project_id: req.project_id.clone(),
            session_id: req.session_id.clone(),
            idempotency_key: req.idempotency_key.clone(),
            prompt: req.prompt.clone(),
            status: RunStatus::Queued,
            created_at: 0,
            started_at: None,
            finished_at: None,
            summary: None,
        };
        requests.push(req);
        Ok(run)
    }
}

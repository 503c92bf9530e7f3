// SPDX-License-Identifier: MIT

//! The narrow transport boundary.
//!
//! The core never talks to Telegram directly: it receives pre-parsed
//! [`ChatUpdate`]s and emits [`Action`]s, and the streamer drives the
//! [`MessageTransport`] trait. The daemon crate provides the real
//! implementation over the Bot API.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport request failed: {0}")]
    Request(String),
    #[error("message edit rejected: {0}")]
    EditRejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRef {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: ChatKind,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserRef {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub message_id: i64,
    pub chat: ChatRef,
    pub from: Option<UserRef>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: UserRef,
    #[serde(default)]
    pub message: Option<IncomingMessage>,
    #[serde(default)]
    pub data: Option<String>,
}

/// One pre-parsed inbound update.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<IncomingMessage>,
    #[serde(default, rename = "callback_query")]
    pub callback_query: Option<CallbackQuery>,
}

impl ChatUpdate {
    /// The external chat id this update belongs to, if determinable.
    pub fn chat_id(&self) -> Option<i64> {
        self.message
            .as_ref()
            .map(|m| m.chat.id)
            .or_else(|| {
                self.callback_query
                    .as_ref()
                    .and_then(|q| q.message.as_ref())
                    .map(|m| m.chat.id)
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub text: String,
    pub callback_data: String,
}

impl Button {
    pub fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.into(),
        }
    }
}

pub type Keyboard = Vec<Vec<Button>>;

/// What the handler wants done on the chat surface.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Reply {
        text: String,
    },
    ReplyWithDocument {
        path: PathBuf,
        caption: Option<String>,
    },
    ReplyKeyboard {
        text: String,
        keyboard: Keyboard,
    },
    EditKeyboard {
        message_id: i64,
        text: String,
        keyboard: Keyboard,
    },
    /// Callback-query acknowledgement, optionally with a toast text.
    Toast {
        callback_id: String,
        text: Option<String>,
    },
}

/// Message-sending primitives the chat layer needs from a transport.
#[async_trait]
pub trait MessageTransport: Clone + Send + Sync + 'static {
    /// Send a message; returns the new message id.
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<i64, TransportError>;

    /// Edit a previously sent message in place.
    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), TransportError>;

    /// Send a local file as a document.
    async fn send_document(
        &self,
        chat_id: i64,
        path: &Path,
        caption: Option<&str>,
    ) -> Result<i64, TransportError>;

    /// Acknowledge a callback query, optionally with a toast.
    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
    ) -> Result<(), TransportError>;
}

// SPDX-License-Identifier: MIT

//! Chat record: one row per external chat.

use crate::id::{ChatId, ProjectId};
use serde::{Deserialize, Serialize};

/// State persisted per external chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub id: ChatId,
    pub project_id: ProjectId,
    /// Telegram chat id; unique across records.
    pub external_chat_id: i64,
    /// Epoch ms deadline until which unsafe mode is active, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsafe_until: Option<u64>,
}

impl ChatRecord {
    /// Whether unsafe mode is active at `now`.
    pub fn unsafe_active(&self, now: u64) -> bool {
        self.unsafe_until.is_some_and(|until| now < until)
    }
}

// SPDX-License-Identifier: MIT

//! Inbound-update dedupe log.

use serde::{Deserialize, Serialize};

/// One accepted inbound chat update. The primary key is the transport's
/// update id; a second insert with the same id is rejected
/// (first-writer-wins).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboxUpdate {
    pub update_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,
    pub payload: serde_json::Value,
    pub received_at: u64,
}

// SPDX-License-Identifier: MIT

//! Persisted run event: one normalized event with its per-run sequence.

use crate::event::EngineEvent;
use crate::id::RunId;
use serde::{Deserialize, Serialize};

/// Append-only event row. `(run_id, seq)` is gap-free and strictly
/// increasing per run, starting at 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub run_id: RunId,
    pub seq: u64,
    pub event: EngineEvent,
    pub created_at: u64,
}

impl RunEvent {
    pub fn event_type(&self) -> &'static str {
        self.event.event_type()
    }
}

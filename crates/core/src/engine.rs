// SPDX-License-Identifier: MIT

//! Engine selection: which agent CLI backs a session.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The two supported agent command-line tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Claude,
    #[serde(rename = "opencode")]
    OpenCode,
}

impl EngineKind {
    /// Binary name invoked for this engine.
    pub fn binary(&self) -> &'static str {
        match self {
            EngineKind::Claude => "claude",
            EngineKind::OpenCode => "opencode",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary())
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" => Ok(EngineKind::Claude),
            "opencode" => Ok(EngineKind::OpenCode),
            other => Err(format!("unknown engine: {other}")),
        }
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;

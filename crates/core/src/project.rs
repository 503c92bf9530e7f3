// SPDX-License-Identifier: MIT

//! Project record: an on-disk directory runs execute in.

use crate::engine::EngineKind;
use crate::id::ProjectId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A configured project.
///
/// The serde shape matches one entry of the projects config file, so the
/// config loader deserializes straight into this record. Projects are
/// immutable during a run; only a config reload replaces them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub root_path: PathBuf,
    pub default_engine: EngineKind,
    /// URL handed to `opencode --attach` for projects backed by a
    /// long-lived opencode server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opencode_attach_url: Option<String>,
}

#[cfg(test)]
#[path = "project_tests.rs"]
mod tests;

// SPDX-License-Identifier: MIT

//! Projects file loading.

use relay_core::Project;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProjectsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid projects file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// Parse the projects file: a JSON array of project entries, in the
/// order that "first configured project" refers to.
pub fn load(path: &Path) -> Result<Vec<Project>, ProjectsError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ProjectsError::Read {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ProjectsError::Parse {
        path: path.display().to_string(),
        source,
    })
}

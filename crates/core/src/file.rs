// SPDX-License-Identifier: MIT

//! File transfer provenance records.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileDirection {
    Upload,
    Download,
}

/// Record of one file moved through the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub direction: FileDirection,
    pub original_name: String,
    /// Path relative to the data-dir sandbox root.
    pub stored_rel_path: String,
    pub size_bytes: u64,
    pub sha256: String,
    pub created_at: u64,
}

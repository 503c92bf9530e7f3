// SPDX-License-Identifier: MIT

//! Error types for orchestration and execution.

use relay_adapters::RunnerError;
use relay_core::SessionId;
use relay_storage::StoreError;
use thiserror::Error;

/// Errors from driving one engine process.
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("runner error: {0}")]
    Runner(#[from] RunnerError),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("project not found: {0}")]
    ProjectNotFound(String),
    #[error("executor failure: {0}")]
    Internal(String),
}

/// Errors from the run orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("session already has an active run: {0}")]
    SessionAlreadyActive(SessionId),
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Execute(#[from] ExecuteError),
}

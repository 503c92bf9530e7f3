// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! relay-engine: run orchestration.
//!
//! The orchestrator turns chat prompts into durable runs, the worker
//! pool leases and executes them with bounded concurrency, and the CLI
//! executor drives one engine process per run, feeding normalized
//! events back through the orchestrator's persistence path.

pub mod error;
pub mod executor;
pub mod orchestrator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod worker;

pub use error::{ExecuteError, OrchestratorError};
pub use executor::{CliExecutor, EnginePrefs, ExecutorConfig, PrefsRegistry};
pub use orchestrator::{
    EnqueueRequest, EventSink, ExecutionContext, ExecutionReport, NullEventSink, ReconcileOutcome,
    RunExecutor, RunEventObserver, RunFinish, RunOrchestrator, RunService,
};
pub use worker::{WorkerConfig, WorkerPool};

// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! relay-adapters: the process-facing edge of the bridge.
//!
//! Line framing for byte streams, the per-engine parsers that normalize
//! JSON-lines output into [`relay_core::EngineEvent`]s, and the child
//! process runner with single-flight and cancellation escalation.

pub mod env;
pub mod framer;
pub mod parser;
pub mod runner;

pub use framer::LineFramer;
pub use parser::{ClaudeParser, EngineParser, OpenCodeParser};
pub use runner::{
    ChunkSink, LifecycleEvent, NullSink, ProcessHandle, ProcessResult, ProcessRunner,
    ProcessStatus, RunnerError, StartConfig,
};

// SPDX-License-Identifier: MIT

//! Scripted executor and recording sink for tests in this crate and
//! the workspace scenario suite.

use crate::error::ExecuteError;
use crate::orchestrator::{
    EventSink, ExecutionContext, ExecutionReport, RunEventObserver, RunExecutor, RunFinish,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::{EngineEvent, RunId, RunOutcome};
use std::sync::Arc;
use std::time::Duration;

/// Executor that replays a fixed event script through the observer.
pub struct ScriptedExecutor {
    pub events: Vec<EngineEvent>,
    pub exit_status: RunOutcome,
    pub engine_session_id: Option<String>,
    /// Optional artificial execution time.
    pub delay: Option<Duration>,
    /// When set, `execute` returns this error instead of a report.
    pub fail_with: Option<String>,
    pub calls: Arc<Mutex<Vec<ExecutionContext>>>,
}

impl ScriptedExecutor {
    pub fn succeeding(events: Vec<EngineEvent>) -> Self {
        Self {
            events,
            exit_status: RunOutcome::Success,
            engine_session_id: None,
            delay: None,
            fail_with: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            events: Vec::new(),
            exit_status: RunOutcome::Error,
            engine_session_id: None,
            delay: None,
            fail_with: Some(message.to_string()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A typical happy-path script: started, some text, finished.
    pub fn happy_path() -> Self {
        Self::succeeding(vec![
            EngineEvent::RunStarted {
                run_id: None,
                timestamp: None,
            },
            EngineEvent::TextDelta {
                text: "hello from the engine".to_string(),
                channel: None,
            },
            EngineEvent::RunFinished {
                status: RunOutcome::Success,
            },
        ])
    }
}

#[async_trait]
impl RunExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        observer: Arc<dyn RunEventObserver>,
    ) -> Result<ExecutionReport, ExecuteError> {
        self.calls.lock().push(ctx.clone());
        if let Some(message) = &self.fail_with {
            return Err(ExecuteError::Internal(message.clone()));
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        for event in &self.events {
            observer.on_event(event.clone()).await?;
        }
        Ok(ExecutionReport {
            exit_status: self.exit_status,
            engine_session_id: self.engine_session_id.clone(),
            bytes_in: ctx.prompt.len() as u64,
            bytes_out: None,
            events_persisted: true,
            events: Vec::new(),
        })
    }
}

/// Sink that records everything it receives.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<(Option<i64>, RunId, EngineEvent)>>,
    pub finishes: Mutex<Vec<(Option<i64>, RunId, RunFinish)>>,
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn on_event(&self, chat_id: Option<i64>, run_id: &RunId, event: &EngineEvent) {
        self.events
            .lock()
            .push((chat_id, run_id.clone(), event.clone()));
    }

    async fn on_finished(&self, chat_id: Option<i64>, run_id: &RunId, finish: &RunFinish) {
        self.finishes
            .lock()
            .push((chat_id, run_id.clone(), finish.clone()));
    }
}

// SPDX-License-Identifier: MIT

//! Builders for tests in other crates. Compiled only with the
//! `test-support` feature (or under `cfg(test)`).

use crate::chat::ChatRecord;
use crate::engine::EngineKind;
use crate::job::{Job, JobStatus};
use crate::project::Project;
use crate::run::{Run, RunStatus};
use crate::session::{Session, SessionStatus};
use std::path::PathBuf;

pub fn project(id: &str) -> Project {
    Project {
        id: id.into(),
        name: id.to_string(),
        root_path: PathBuf::from(format!("/tmp/{id}")),
        default_engine: EngineKind::Claude,
        opencode_attach_url: None,
    }
}

pub fn chat(id: &str, project_id: &str, external_chat_id: i64) -> ChatRecord {
    ChatRecord {
        id: id.into(),
        project_id: project_id.into(),
        external_chat_id,
        unsafe_until: None,
    }
}

pub fn session(id: &str, project_id: &str) -> Session {
    Session {
        id: id.into(),
        project_id: project_id.into(),
        chat_id: None,
        provider: EngineKind::Claude,
        engine_session_id: None,
        status: SessionStatus::Idle,
        prompt: String::new(),
    }
}

pub fn run(id: &str, session_id: &str, idempotency_key: &str) -> Run {
    Run {
        id: id.into(),
        project_id: "p1".into(),
        session_id: session_id.into(),
        idempotency_key: idempotency_key.to_string(),
        prompt: "hello".to_string(),
        status: RunStatus::Queued,
        created_at: 0,
        started_at: None,
        finished_at: None,
        summary: None,
    }
}

pub fn job(id: &str, run_id: &str) -> Job {
    Job {
        id: id.to_string(),
        run_id: run_id.into(),
        status: JobStatus::Queued,
        lease_owner: None,
        lease_expires_at: None,
        available_at: 0,
        attempts: 0,
        last_error: None,
    }
}

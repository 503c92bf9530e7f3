// SPDX-License-Identifier: MIT

//! Argument and permission-policy construction for the `opencode` CLI.
//!
//! Tool policy travels in the `OPENCODE_CONFIG_CONTENT` environment
//! variable as a JSON document. The document only ever contains `allow`
//! and `deny` decisions: an interactive `ask` would hang a headless run.

use relay_core::Session;
use std::path::Path;

/// Name of the environment variable carrying the policy document.
pub const CONFIG_ENV: &str = "OPENCODE_CONFIG_CONTENT";

#[derive(Debug, Clone, Default)]
pub struct OpenCodeOptions {
    pub agent: Option<String>,
    /// Fork when continuing or resuming a session.
    pub fork: bool,
}

/// Build the full argv (after the binary name).
pub fn build_args(
    prompt: &str,
    session: &Session,
    model: Option<&str>,
    attach_url: Option<&str>,
    files: &[&Path],
    options: &OpenCodeOptions,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "run".into(),
        prompt.into(),
        "--format".into(),
        "json".into(),
    ];

    if session.wants_continue() {
        args.push("--continue".into());
        if options.fork {
            args.push("--fork".into());
        }
    } else if let Some(id) = session.captured_engine_session() {
        args.push("--session".into());
        args.push(id.into());
        if options.fork {
            args.push("--fork".into());
        }
    }

    if let Some(url) = attach_url {
        args.push("--attach".into());
        args.push(url.into());
    }
    for file in files {
        args.push("-f".into());
        args.push(file.display().to_string());
    }
    if let Some(model) = model {
        args.push("--model".into());
        args.push(model.into());
    }
    if let Some(agent) = &options.agent {
        args.push("--agent".into());
        args.push(agent.clone());
    }

    args
}

/// The permission policy document for `OPENCODE_CONFIG_CONTENT`.
pub fn permission_config(unsafe_mode: bool) -> String {
    let mut permission = serde_json::json!({
        "*": "deny",
        "read": "allow",
        "glob": "allow",
        "grep": "allow",
        "list": "allow",
        "external_directory": "deny",
    });
    if unsafe_mode {
        permission["edit"] = serde_json::json!({"*": "allow"});
        permission["bash"] = serde_json::json!({
            "*": "deny",
            "git *|pnpm *|npm *|cargo *|python *|node *": "allow",
            "rm *|sudo *|dd *|mkfs *": "deny",
        });
    }
    serde_json::json!({ "permission": permission }).to_string()
}

#[cfg(test)]
#[path = "opencode_tests.rs"]
mod tests;

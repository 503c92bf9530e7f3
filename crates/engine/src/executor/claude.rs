// SPDX-License-Identifier: MIT

//! Argument construction for the `claude` CLI.

use relay_core::Session;

/// Tools granted in safe mode (read-only exploration).
pub const SAFE_TOOLS: &str = "Read,Glob,Grep";
/// Tools granted while unsafe mode is active.
pub const UNSAFE_TOOLS: &str = "Bash,Read,Edit,Write,Glob,Grep";

/// Optional knobs applied to every claude invocation.
#[derive(Debug, Clone, Default)]
pub struct ClaudeOptions {
    pub disallowed_tools: Option<String>,
    pub max_turns: Option<u32>,
    pub max_budget_usd: Option<f64>,
    /// Fork when resuming a captured session instead of appending to it.
    pub fork_session: bool,
}

/// Build the full argv (after the binary name).
pub fn build_args(
    prompt: &str,
    session: &Session,
    model: Option<&str>,
    unsafe_mode: bool,
    options: &ClaudeOptions,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-p".into(),
        prompt.into(),
        "--output-format".into(),
        "stream-json".into(),
        "--include-partial-messages".into(),
        "--verbose".into(),
    ];

    if let Some(model) = model {
        args.push("--model".into());
        args.push(model.into());
    }

    if session.wants_continue() {
        args.push("--continue".into());
    } else if let Some(id) = session.captured_engine_session() {
        args.push("--resume".into());
        args.push(id.into());
        if options.fork_session {
            args.push("--fork-session".into());
        }
    }

    let tools = if unsafe_mode { UNSAFE_TOOLS } else { SAFE_TOOLS };
    args.push("--tools".into());
    args.push(tools.into());
    args.push("--allowedTools".into());
    args.push(tools.into());

    if let Some(disallowed) = &options.disallowed_tools {
        args.push("--disallowedTools".into());
        args.push(disallowed.clone());
    }
    if let Some(max_turns) = options.max_turns {
        args.push("--max-turns".into());
        args.push(max_turns.to_string());
    }
    if let Some(budget) = options.max_budget_usd {
        args.push("--max-budget-usd".into());
        args.push(budget.to_string());
    }

    args
}

#[cfg(test)]
#[path = "claude_tests.rs"]
mod tests;

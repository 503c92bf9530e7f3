// SPDX-License-Identifier: MIT

//! Child environment sanitization.

/// Directories expected to hold the engine binaries; ensured to lead
/// `PATH` so the CLIs resolve the same way as in a login shell.
const PATH_PREFIXES: [&str; 2] = ["/opt/homebrew/bin", "/usr/local/bin"];

/// Prepare an inherited environment for an engine child process:
/// removes the `CLAUDECODE` marker (a nested claude refuses to start
/// under it) and prefixes `PATH` with the common binary directories.
pub fn sanitize_env(mut env: Vec<(String, String)>) -> Vec<(String, String)> {
    env.retain(|(key, _)| key != "CLAUDECODE");

    let current_path = env
        .iter()
        .find(|(key, _)| key == "PATH")
        .map(|(_, value)| value.clone())
        .unwrap_or_default();

    let mut parts: Vec<&str> = Vec::new();
    for prefix in PATH_PREFIXES {
        if !current_path.split(':').any(|dir| dir == prefix) {
            parts.push(prefix);
        }
    }
    if !parts.is_empty() {
        let new_path = if current_path.is_empty() {
            parts.join(":")
        } else {
            format!("{}:{}", parts.join(":"), current_path)
        };
        env.retain(|(key, _)| key != "PATH");
        env.push(("PATH".to_string(), new_path));
    }
    env
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;

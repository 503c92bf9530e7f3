// SPDX-License-Identifier: MIT

use super::*;
use relay_core::test_support;
use relay_core::CONTINUE_MARKER;

#[test]
fn base_args_for_new_session() {
    let session = test_support::session("s1", "p1");
    let args = build_args(
        "do it",
        &session,
        None,
        None,
        &[],
        &OpenCodeOptions::default(),
    );
    assert_eq!(args, vec!["run", "do it", "--format", "json"]);
}

#[test]
fn continue_and_fork() {
    let mut session = test_support::session("s1", "p1");
    session.engine_session_id = Some(CONTINUE_MARKER.into());
    let args = build_args(
        "go",
        &session,
        None,
        None,
        &[],
        &OpenCodeOptions {
            fork: true,
            agent: None,
        },
    );
    assert!(args.contains(&"--continue".to_string()));
    assert!(args.contains(&"--fork".to_string()));
}

#[test]
fn captured_session_uses_session_flag() {
    let mut session = test_support::session("s1", "p1");
    session.engine_session_id = Some("oc_77".into());
    let args = build_args("go", &session, None, None, &[], &OpenCodeOptions::default());
    let pos = args.iter().position(|a| a == "--session").unwrap();
    assert_eq!(args[pos + 1], "oc_77");
}

#[test]
fn attach_files_model_and_agent() {
    let session = test_support::session("s1", "p1");
    let file = std::path::PathBuf::from("/tmp/notes.md");
    let args = build_args(
        "go",
        &session,
        Some("openai/gpt-5"),
        Some("http://127.0.0.1:4096"),
        &[file.as_path()],
        &OpenCodeOptions {
            agent: Some("build".into()),
            fork: false,
        },
    );
    assert!(args.windows(2).any(|w| w == ["--attach", "http://127.0.0.1:4096"]));
    assert!(args.windows(2).any(|w| w == ["-f", "/tmp/notes.md"]));
    assert!(args.windows(2).any(|w| w == ["--model", "openai/gpt-5"]));
    assert!(args.windows(2).any(|w| w == ["--agent", "build"]));
}

#[test]
fn safe_policy_denies_by_default() {
    let config: serde_json::Value =
        serde_json::from_str(&permission_config(false)).unwrap();
    let permission = &config["permission"];
    assert_eq!(permission["*"], "deny");
    assert_eq!(permission["read"], "allow");
    assert_eq!(permission["external_directory"], "deny");
    assert!(permission.get("edit").is_none());
    assert!(permission.get("bash").is_none());
}

#[test]
fn unsafe_policy_opens_edit_and_scoped_bash() {
    let config: serde_json::Value =
        serde_json::from_str(&permission_config(true)).unwrap();
    let permission = &config["permission"];
    assert_eq!(permission["edit"]["*"], "allow");
    let bash = &permission["bash"];
    assert_eq!(bash["*"], "deny");
    assert_eq!(bash["git *|pnpm *|npm *|cargo *|python *|node *"], "allow");
    assert_eq!(bash["rm *|sudo *|dd *|mkfs *"], "deny");
}

#[yare::parameterized(
    safe   = { false },
    unsafe_mode = { true },
)]
fn policy_never_contains_ask(unsafe_mode: bool) {
    assert!(!permission_config(unsafe_mode).contains("ask"));
}

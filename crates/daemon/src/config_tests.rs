// SPDX-License-Identifier: MIT

use super::*;
use std::collections::HashMap;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name| map.get(name).cloned()
}

const MINIMAL: &[(&str, &str)] = &[
    ("TELEGRAM_BOT_TOKEN", "123:abc"),
    ("TELEGRAM_OWNER_USER_ID", "42"),
];

#[test]
fn minimal_config_uses_defaults() {
    let config = Config::from_lookup(lookup_from(MINIMAL)).unwrap();
    assert_eq!(config.owner_user_id, 42);
    assert_eq!(config.data_dir, std::path::PathBuf::from("./data"));
    assert_eq!(
        config.projects_config_path,
        std::path::PathBuf::from("./config/projects.json")
    );
    assert_eq!(config.dashboard_port, 4312);
    assert_eq!(config.dashboard_bind_host, "127.0.0.1");
    assert!(config.dashboard_basic_auth.is_none());
    assert!(!config.kill_switch_disable_runs);
    assert_eq!(config.max_upload_bytes, 26_214_400);
}

#[yare::parameterized(
    token = { "TELEGRAM_BOT_TOKEN" },
    owner = { "TELEGRAM_OWNER_USER_ID" },
)]
fn required_vars_are_enforced(missing: &str) {
    let pairs: Vec<(&str, &str)> = MINIMAL
        .iter()
        .filter(|(name, _)| *name != missing)
        .copied()
        .collect();
    let err = Config::from_lookup(lookup_from(&pairs)).unwrap_err();
    assert!(matches!(err, ConfigError::Missing(name) if name == missing));
}

#[test]
fn invalid_owner_id_is_rejected() {
    let err = Config::from_lookup(lookup_from(&[
        ("TELEGRAM_BOT_TOKEN", "t"),
        ("TELEGRAM_OWNER_USER_ID", "not-a-number"),
    ]))
    .unwrap_err();
    assert!(matches!(
        err,
        ConfigError::Invalid {
            name: "TELEGRAM_OWNER_USER_ID",
            ..
        }
    ));
}

#[yare::parameterized(
    one   = { "1", true },
    word  = { "true", true },
    yes   = { "yes", true },
    zero  = { "0", false },
    other = { "off", false },
)]
fn kill_switch_parsing(value: &str, expected: bool) {
    let mut pairs = MINIMAL.to_vec();
    pairs.push(("KILL_SWITCH_DISABLE_RUNS", value));
    let config = Config::from_lookup(lookup_from(&pairs)).unwrap();
    assert_eq!(config.kill_switch_disable_runs, expected);
}

#[test]
fn basic_auth_needs_both_halves() {
    let mut pairs = MINIMAL.to_vec();
    pairs.push(("DASHBOARD_BASIC_AUTH_USER", "admin"));
    let config = Config::from_lookup(lookup_from(&pairs)).unwrap();
    assert!(config.dashboard_basic_auth.is_none());

    pairs.push(("DASHBOARD_BASIC_AUTH_PASS", "secret"));
    let config = Config::from_lookup(lookup_from(&pairs)).unwrap();
    assert_eq!(
        config.dashboard_basic_auth,
        Some(("admin".to_string(), "secret".to_string()))
    );
}

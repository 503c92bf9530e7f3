// SPDX-License-Identifier: MIT

//! Centralized environment configuration for the daemon.

use std::path::PathBuf;
use thiserror::Error;

/// Default upload cap: 25 MiB.
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 26_214_400;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub telegram_bot_token: String,
    pub owner_user_id: i64,
    pub data_dir: PathBuf,
    pub projects_config_path: PathBuf,
    /// Bind address for the HTTP dashboard sidecar.
    pub dashboard_port: u16,
    pub dashboard_bind_host: String,
    pub dashboard_basic_auth: Option<(String, String)>,
    pub kill_switch_disable_runs: bool,
    pub max_upload_bytes: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from a lookup function (injectable for tests).
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let required = |name: &'static str| -> Result<String, ConfigError> {
            lookup(name)
                .filter(|value| !value.is_empty())
                .ok_or(ConfigError::Missing(name))
        };
        let parsed = |name: &'static str, default: u64| -> Result<u64, ConfigError> {
            match lookup(name) {
                Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                    name,
                    value,
                }),
                None => Ok(default),
            }
        };

        let owner_raw = required("TELEGRAM_OWNER_USER_ID")?;
        let owner_user_id = owner_raw
            .parse()
            .map_err(|_| ConfigError::Invalid {
                name: "TELEGRAM_OWNER_USER_ID",
                value: owner_raw,
            })?;

        let basic_user = lookup("DASHBOARD_BASIC_AUTH_USER");
        let basic_pass = lookup("DASHBOARD_BASIC_AUTH_PASS");
        let dashboard_basic_auth = match (basic_user, basic_pass) {
            (Some(user), Some(pass)) if !user.is_empty() => Some((user, pass)),
            _ => None,
        };

        Ok(Self {
            telegram_bot_token: required("TELEGRAM_BOT_TOKEN")?,
            owner_user_id,
            data_dir: lookup("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            projects_config_path: lookup("PROJECTS_CONFIG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./config/projects.json")),
            dashboard_port: parsed("DASHBOARD_PORT", 4312)? as u16,
            dashboard_bind_host: lookup("DASHBOARD_BIND_HOST")
                .unwrap_or_else(|| "127.0.0.1".to_string()),
            dashboard_basic_auth,
            kill_switch_disable_runs: lookup("KILL_SWITCH_DISABLE_RUNS")
                .map(|value| matches!(value.as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            max_upload_bytes: parsed("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
        })
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("relayd.log")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join("relayd.lock")
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

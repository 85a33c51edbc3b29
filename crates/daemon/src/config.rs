// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration: state directory layout and the environment keys
//! that tune the orchestration engine (§6 "Configuration (environment)").

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine a state directory (set TF_STATE_DIR or HOME)")]
    NoStateDir,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolved paths and tunables for one daemon instance.
///
/// Grounded on the teacher's `lifecycle::Config`: a single struct holding
/// every path under the state directory, built once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub state_dir: PathBuf,
    pub socket_path: PathBuf,
    pub lock_path: PathBuf,
    pub version_path: PathBuf,
    pub log_path: PathBuf,
    pub store_dir: PathBuf,
    pub sessions_path: PathBuf,
    pub workspaces_root: PathBuf,
    pub logs_dir: PathBuf,

    pub workers: usize,
    pub task_timeout: Duration,
    pub daily_cost_limit_usd: Option<f64>,
    pub monthly_cost_limit_usd: Option<f64>,
    pub session_history_limit: usize,
    pub canonical_repo: PathBuf,
    pub agent_command: String,
    pub agent_args: Vec<String>,
    pub model: String,
    pub model_api_key_var: String,
    pub model_api_key_value: String,
    pub classifier_command: String,
    pub classifier_args: Vec<String>,
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64_opt(key: &str) -> Option<f64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_secs(key: &str, default_secs: u64) -> Duration {
    Duration::from_secs(env_usize(key, default_secs as usize) as u64)
}

fn env_words(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(v) => v.split_whitespace().map(str::to_string).collect(),
        Err(_) => default.iter().map(|s| s.to_string()).collect(),
    }
}

impl Config {
    /// Resolves the state directory via `TF_STATE_DIR`, then
    /// `XDG_STATE_HOME/tf`, then `~/.local/state/tf`, and lays out every
    /// path the daemon owns underneath it.
    pub fn load() -> Result<Self, ConfigError> {
        let state_dir = Self::state_dir()?;
        std::fs::create_dir_all(&state_dir)?;

        let sessions_path = state_dir.join("sessions");
        let workspaces_root = state_dir.join("workspaces");
        let logs_dir = state_dir.join("logs");
        std::fs::create_dir_all(&sessions_path)?;
        std::fs::create_dir_all(&workspaces_root)?;
        std::fs::create_dir_all(&logs_dir)?;

        let model_api_key_var = env_string("TF_MODEL_API_KEY_VAR", "ANTHROPIC_API_KEY");
        let model_api_key_value = std::env::var(&model_api_key_var).unwrap_or_default();

        Ok(Self {
            socket_path: state_dir.join("daemon.sock"),
            lock_path: state_dir.join("daemon.lock"),
            version_path: state_dir.join("daemon.version"),
            log_path: state_dir.join("daemon.log"),
            store_dir: state_dir.join("store"),
            sessions_path,
            workspaces_root,
            logs_dir,
            workers: env_usize("WORKERS", 3),
            task_timeout: env_secs("TASK_TIMEOUT_SECONDS", 300),
            daily_cost_limit_usd: env_f64_opt("DAILY_COST_LIMIT_USD"),
            monthly_cost_limit_usd: env_f64_opt("MONTHLY_COST_LIMIT_USD"),
            session_history_limit: env_usize("SESSION_HISTORY_LIMIT", 10),
            canonical_repo: PathBuf::from(env_string(
                "TF_CANONICAL_REPO",
                &std::env::current_dir()
                    .map(|d| d.display().to_string())
                    .unwrap_or_else(|_| ".".to_string()),
            )),
            agent_command: env_string("TF_AGENT_COMMAND", "claude"),
            agent_args: env_words("TF_AGENT_ARGS", &["--print"]),
            model: env_string("TF_MODEL", "claude-default"),
            model_api_key_var,
            model_api_key_value,
            classifier_command: env_string("TF_CLASSIFIER_COMMAND", "claude"),
            classifier_args: env_words("TF_CLASSIFIER_ARGS", &["--print"]),
            state_dir,
        })
    }

    fn state_dir() -> Result<PathBuf, ConfigError> {
        if let Ok(dir) = std::env::var("TF_STATE_DIR") {
            return Ok(PathBuf::from(dir));
        }
        if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
            return Ok(PathBuf::from(xdg).join("tf"));
        }
        let home = std::env::var("HOME").map_err(|_| ConfigError::NoStateDir)?;
        Ok(PathBuf::from(home).join(".local/state/tf"))
    }

    /// `LOG_LEVEL` recognized values are `DEBUG|INFO|WARN|ERROR`; anything
    /// else (or unset) falls back to the `RUST_LOG`/`info` default used by
    /// `tracing_subscriber::EnvFilter`.
    pub fn log_filter(&self) -> String {
        match std::env::var("LOG_LEVEL").ok().as_deref() {
            Some("DEBUG") => "debug".to_string(),
            Some("INFO") => "info".to_string(),
            Some("WARN") => "warn".to_string(),
            Some("ERROR") => "error".to_string(),
            _ => "info".to_string(),
        }
    }
}

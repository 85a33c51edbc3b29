// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent runner (C5): spawns the coding-agent subprocess with a pruned
//! environment and its own process group, captures its output, enforces
//! the wall-clock cap, and escalates from a polite to a forceful kill.
//!
//! Grounded on the teacher's `subprocess::run_with_timeout` helper and the
//! `ClaudeAgentAdapter::spawn`/`kill` shape in `agent/claude.rs`, adapted
//! from a tmux-mediated session to a direct child process the runner owns
//! outright.

use std::path::{Path, PathBuf};
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::process::CommandExt;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::time::timeout;

/// Default hard wall-clock cap for an agent invocation (spec §4.5).
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(300);

/// Grace period between the polite and forceful termination signals.
pub const KILL_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Interval between liveness checks while waiting out the kill grace period.
const KILL_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("spawn failed: {0}")]
    SpawnFailed(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything the runner needs to spawn one agent invocation.
pub struct SpawnConfig {
    pub command: String,
    pub args: Vec<String>,
    pub workspace_path: PathBuf,
    pub agent_kind: String,
    pub session_uuid: uuid::Uuid,
    /// Name of the env var carrying the model provider's API key, and its
    /// value (only this one secret crosses into the child's environment).
    pub model_api_key_var: String,
    pub model_api_key_value: String,
    pub log_path: PathBuf,
    pub timeout: Duration,
}

/// Outcome of a completed (non-killed) agent invocation.
pub enum RunOutcome {
    /// Exited zero; `result` is the captured stdout.
    Success { result: String },
    /// Exited non-zero.
    Failed { exit_code: Option<i32> },
    /// Hit the wall-clock cap and was killed.
    TimedOut,
    /// Killed on explicit request (`stop`).
    Stopped,
}

/// A running agent subprocess. Holds the child handle so the caller can
/// await completion or request a stop.
pub struct RunningAgent {
    child: Child,
    pid: u32,
    log_path: PathBuf,
}

impl RunningAgent {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Waits for the child to exit, enforcing `timeout`. On timeout, kills
    /// the process group and returns [`RunOutcome::TimedOut`].
    pub async fn wait(mut self, task_timeout: Duration) -> Result<RunOutcome, RunnerError> {
        match timeout(task_timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                if status.success() {
                    let result = tokio::fs::read_to_string(&self.log_path)
                        .await
                        .unwrap_or_default();
                    Ok(RunOutcome::Success { result })
                } else {
                    Ok(RunOutcome::Failed {
                        exit_code: status.code(),
                    })
                }
            }
            Ok(Err(e)) => Err(RunnerError::Io(e)),
            Err(_elapsed) => {
                kill_group(self.pid, false).await;
                let _ = self.child.wait().await;
                Ok(RunOutcome::TimedOut)
            }
        }
    }

    /// Explicit stop (spec §4.8): polite signal, grace period, forceful
    /// kill. Always returns [`RunOutcome::Stopped`] once the group is dead.
    pub async fn stop(mut self) -> RunOutcome {
        kill_group(self.pid, false).await;
        let _ = self.child.wait().await;
        RunOutcome::Stopped
    }
}

/// Spawn the agent subprocess per spec §4.5/§6: cwd = workspace, pruned
/// environment containing only the model API key, `AGENT_KIND`, and
/// `SESSION_ID`; own process group so termination signals reach the whole
/// tree the agent may have spawned (sub-shells, linters, etc).
pub async fn spawn(config: &SpawnConfig) -> Result<RunningAgent, RunnerError> {
    tokio::fs::create_dir_all(
        config
            .log_path
            .parent()
            .unwrap_or_else(|| Path::new(".")),
    )
    .await?;
    let log_file = tokio::fs::File::create(&config.log_path).await?;
    let log_file_err = log_file.try_clone().await?;

    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args)
        .current_dir(&config.workspace_path)
        .env_clear()
        .env(&config.model_api_key_var, &config.model_api_key_value)
        .env("AGENT_KIND", &config.agent_kind)
        .env("SESSION_ID", config.session_uuid.to_string())
        .stdin(std::process::Stdio::null())
        .stdout(log_file.into_std().await)
        .stderr(log_file_err.into_std().await)
        .kill_on_drop(true);

    #[cfg(unix)]
    {
        // pgid = pid: the whole subtree can be signaled with `kill -<pid>`.
        cmd.process_group(0);
    }

    let child = cmd
        .spawn()
        .map_err(|e| RunnerError::SpawnFailed(e.to_string()))?;
    let pid = child.id().ok_or_else(|| {
        RunnerError::SpawnFailed("child exited before pid could be read".to_string())
    })?;

    Ok(RunningAgent {
        child,
        pid,
        log_path: config.log_path.clone(),
    })
}

/// Sends a signal to the whole process group rooted at `pid` by shelling
/// out to `kill`, matching the teacher's pattern of driving system
/// utilities through `tokio::process::Command` rather than raw syscalls
/// (the workspace forbids `unsafe_code`, ruling out a direct `libc::kill`).
async fn send_group_signal(pid: u32, sigkill: bool) {
    let signal = if sigkill { "-KILL" } else { "-TERM" };
    let _ = Command::new("kill")
        .arg(signal)
        .arg(format!("-{pid}"))
        .output()
        .await;
}

/// Signals the process group rooted at `pid` to stop, for callers (the
/// task manager's explicit-stop path) that only have the pid on hand and
/// not the owning [`RunningAgent`].
pub async fn kill(pid: u32) {
    kill_group(pid, false).await;
}

/// Polite-then-forceful kill escalation (spec §4.5): SIGTERM to the group,
/// wait up to [`KILL_GRACE_PERIOD`] polling liveness, then SIGKILL.
async fn kill_group(pid: u32, already_dead: bool) {
    if already_dead {
        return;
    }
    send_group_signal(pid, false).await;

    let deadline = tokio::time::Instant::now() + KILL_GRACE_PERIOD;
    while tokio::time::Instant::now() < deadline {
        if !is_pid_alive(pid) {
            return;
        }
        tokio::time::sleep(KILL_POLL_INTERVAL).await;
    }
    send_group_signal(pid, true).await;
}

/// Liveness check used both by the kill escalation and by the stall sweep
/// (spec §4.5: "pid is no longer alive"). Reads `/proc/<pid>` directly
/// rather than shelling out, since this check runs frequently.
#[cfg(target_os = "linux")]
pub fn is_pid_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
pub fn is_pid_alive(_pid: u32) -> bool {
    true
}

/// Drains `reader` into `log_path`, returning the bytes written. Exists so
/// callers with an already-open async reader (e.g. a piped child) can
/// reuse the same log-capture discipline as [`spawn`]'s inherited-fd path.
pub async fn capture_to_file<R: AsyncRead + Unpin>(
    mut reader: R,
    log_path: &Path,
) -> Result<u64, RunnerError> {
    use tokio::io::AsyncReadExt;
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .await?;
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    file.write_all(&buf).await?;
    Ok(buf.len() as u64)
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;

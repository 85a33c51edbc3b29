// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon client for CLI commands

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::client_lifecycle::log_connection_error;
use crate::daemon_process::{
    cleanup_stale_socket, daemon_dir, daemon_socket, probe_socket, read_startup_error,
    start_daemon_background, stop_daemon_sync, wrap_with_startup_error,
};

use tf_core::{InputKind, Priority, Task, TaskState, UserId};
use tf_daemon::protocol::{Request, Response, StatusSnapshot};
use tf_daemon::protocol_wire::{self, ProtocolError};
use tf_daemon::{Channel, Envelope, Scope};
use thiserror::Error;
use tokio::net::UnixStream;

/// Timeout for IPC requests (hello, status, event, query, shutdown)
pub fn timeout_ipc() -> Duration {
    crate::env::timeout_ipc_ms().unwrap_or(Duration::from_secs(5))
}

/// Timeout for waiting for daemon to start
pub fn timeout_connect() -> Duration {
    crate::env::timeout_connect_ms().unwrap_or(Duration::from_secs(5))
}

/// Timeout for waiting for process to exit
pub fn timeout_exit() -> Duration {
    crate::env::timeout_exit_ms().unwrap_or(Duration::from_secs(2))
}

/// Polling interval for connection retries
pub fn poll_interval() -> Duration {
    crate::env::connect_poll_ms().unwrap_or(Duration::from_millis(50))
}

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Daemon not running")]
    DaemonNotRunning,

    #[error("Failed to start daemon: {0}")]
    DaemonStartFailed(String),

    #[error("Connection timeout waiting for daemon to start")]
    DaemonStartTimeout,

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Unexpected response from daemon")]
    UnexpectedResponse,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not determine state directory")]
    NoStateDir,
}

/// Daemon client
pub struct DaemonClient {
    socket_path: PathBuf,
}

impl DaemonClient {
    /// For action commands - auto-start with version check, max 1 restart per process
    ///
    /// Action commands mutate state and are user-initiated (submit, stop, clear, etc.).
    /// They should auto-start the daemon but limit restarts to prevent infinite loops.
    pub fn for_action() -> Result<Self, ClientError> {
        Self::connect_or_start_once()
    }

    /// For query commands - connect only, no restart
    ///
    /// Query commands read state and are user-initiated (status, list, show, watch).
    /// If the daemon is the wrong version, there's nothing useful to query anyway.
    pub fn for_query() -> Result<Self, ClientError> {
        Self::connect()
    }

    /// Internal: connect_or_start with restart limit (max 1 restart per process)
    fn connect_or_start_once() -> Result<Self, ClientError> {
        static RESTARTED: AtomicBool = AtomicBool::new(false);

        // If we already restarted this process, don't do it again
        if RESTARTED.load(Ordering::SeqCst) {
            return Self::connect();
        }

        // Check version and restart if needed
        let daemon_dir = daemon_dir()?;
        let version_path = daemon_dir.join("daemon.version");
        if let Ok(daemon_version) = std::fs::read_to_string(&version_path) {
            let cli_version = concat!(env!("CARGO_PKG_VERSION"), "+", env!("BUILD_GIT_HASH"));
            if daemon_version.trim() != cli_version {
                // Mark that we're restarting (before actually doing it)
                RESTARTED.store(true, Ordering::SeqCst);
                eprintln!(
                    "warn: daemon version {} does not match cli version {}, restarting daemon",
                    daemon_version.trim(),
                    cli_version
                );
                stop_daemon_sync();
            }
        }

        // Now connect or start
        match Self::connect() {
            Ok(client) => {
                if probe_socket(&client.socket_path) {
                    Ok(client)
                } else {
                    cleanup_stale_socket()?;
                    let child = start_daemon_background()?;
                    Self::connect_with_retry(timeout_connect(), child)
                }
            }
            Err(ClientError::DaemonNotRunning) => {
                let child = start_daemon_background()?;
                Self::connect_with_retry(timeout_connect(), child)
            }
            Err(e) => Err(wrap_with_startup_error(e)),
        }
    }

    /// Connect to existing daemon (no auto-start)
    pub fn connect() -> Result<Self, ClientError> {
        let socket_path = daemon_socket()?;

        if !socket_path.exists() {
            let err = ClientError::DaemonNotRunning;
            log_connection_error(&err);
            return Err(err);
        }

        Ok(Self { socket_path })
    }

    fn connect_with_retry(
        timeout: Duration,
        mut child: std::process::Child,
    ) -> Result<Self, ClientError> {
        let start = Instant::now();
        while start.elapsed() < timeout {
            // Check if daemon process exited early (startup failure)
            match child.try_wait() {
                Ok(Some(status)) => {
                    // Process exited - startup failed
                    // Poll for startup error in log (filesystem may need to sync)
                    let poll_start = Instant::now();
                    while poll_start.elapsed() < timeout_exit() {
                        if let Some(err) = read_startup_error() {
                            return Err(ClientError::DaemonStartFailed(err));
                        }
                        std::thread::sleep(poll_interval());
                    }
                    // No error found in log, return generic failure
                    return Err(ClientError::DaemonStartFailed(format!(
                        "exited with {}",
                        status
                    )));
                }
                Ok(None) => {
                    // Still running, try to connect
                }
                Err(_) => {
                    // Error checking status, assume still running
                }
            }

            match Self::connect() {
                Ok(client) => return Ok(client),
                Err(ClientError::DaemonNotRunning) => {
                    std::thread::sleep(poll_interval());
                }
                Err(e) => return Err(wrap_with_startup_error(e)),
            }
        }

        // Timeout - check log for startup errors
        Err(wrap_with_startup_error(ClientError::DaemonStartTimeout))
    }

    /// Send a request and receive a response with specific timeouts
    async fn send_with_timeout(
        &self,
        request: &Request,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> Result<Response, ClientError> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        let (mut reader, mut writer) = stream.into_split();

        // Encode and send request with write timeout
        let data = protocol_wire::encode(request)?;
        tokio::time::timeout(write_timeout, protocol_wire::write_message(&mut writer, &data))
            .await
            .map_err(|_| ProtocolError::Timeout)??;

        // Read response with read timeout
        let response_bytes =
            tokio::time::timeout(read_timeout, protocol_wire::read_message(&mut reader))
                .await
                .map_err(|_| ProtocolError::Timeout)??;

        let response: Response = protocol_wire::decode(&response_bytes)?;
        Ok(response)
    }

    /// Send a request and receive a response
    pub async fn send(&self, request: &Request) -> Result<Response, ClientError> {
        match self
            .send_with_timeout(request, timeout_ipc(), timeout_ipc())
            .await
        {
            Ok(response) => Ok(response),
            Err(e) => {
                log_connection_error(&e);
                Err(e)
            }
        }
    }

    /// Helper for simple requests that expect Ok or Error responses
    async fn send_simple(&self, request: &Request) -> Result<(), ClientError> {
        match self.send(request).await? {
            Response::Ok => Ok(()),
            other => Self::reject(other),
        }
    }

    /// `submitMessage(userId, content, inputKind, priority)` (spec §6).
    pub async fn submit_message(
        &self,
        user_id: UserId,
        content: String,
        input_kind: InputKind,
        priority: Priority,
    ) -> Result<Response, ClientError> {
        let request = Request::SubmitMessage {
            user_id,
            content,
            input_kind,
            priority,
        };
        match self.send(&request).await? {
            resp @ (Response::Answer { .. } | Response::Accepted { .. }) => Ok(resp),
            other => Self::reject(other),
        }
    }

    /// Stop a single task by ID.
    pub async fn stop_task(&self, task_id: &str) -> Result<(), ClientError> {
        self.send_simple(&Request::StopTask {
            task_id: task_id.to_string(),
        })
        .await
    }

    /// Stop every task owned by a user.
    pub async fn stop_all_user_tasks(&self, user_id: UserId) -> Result<(), ClientError> {
        self.send_simple(&Request::StopAllUserTasks { user_id }).await
    }

    /// Clear a user's session history.
    pub async fn clear_session(&self, user_id: UserId) -> Result<(), ClientError> {
        self.send_simple(&Request::ClearSession { user_id }).await
    }

    /// Fetch a single task by ID.
    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>, ClientError> {
        match self
            .send(&Request::GetTask {
                task_id: task_id.to_string(),
            })
            .await?
        {
            Response::Task(task) => Ok(Some(*task)),
            Response::Error {
                kind: tf_core::ErrorKind::NotFound,
                ..
            } => Ok(None),
            other => Self::reject(other),
        }
    }

    /// List tasks, optionally filtered by user and/or state.
    pub async fn list_tasks(
        &self,
        user_id: Option<UserId>,
        state: Option<TaskState>,
    ) -> Result<Vec<Task>, ClientError> {
        match self.send(&Request::ListTasks { user_id, state }).await? {
            Response::Tasks(tasks) => Ok(tasks),
            other => Self::reject(other),
        }
    }

    /// Get daemon status.
    pub async fn status(&self) -> Result<StatusSnapshot, ClientError> {
        match self.send(&Request::Status).await? {
            Response::Status(snapshot) => Ok(snapshot),
            other => Self::reject(other),
        }
    }

    /// Request daemon shutdown.
    pub async fn shutdown(&self, kill: bool) -> Result<(), ClientError> {
        match self.send(&Request::Shutdown { kill }).await? {
            Response::Ok | Response::ShuttingDown => Ok(()),
            other => Self::reject(other),
        }
    }

    /// Get daemon version via Hello handshake.
    pub async fn hello(&self) -> Result<String, ClientError> {
        let request = Request::Hello {
            version: concat!(env!("CARGO_PKG_VERSION"), "+", env!("BUILD_GIT_HASH")).to_string(),
        };
        match self.send(&request).await? {
            Response::Hello { version } => Ok(version),
            other => Self::reject(other),
        }
    }

    /// Open a one-way subscription to a fan-out channel. The connection is
    /// dedicated to this stream for its lifetime (spec §4.11, §6).
    pub async fn subscribe(
        &self,
        scope: Scope,
        channel: Channel,
    ) -> Result<SubscriptionStream, ClientError> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        let (reader, mut writer) = stream.into_split();

        let data = protocol_wire::encode(&Request::Subscribe { scope, channel })?;
        protocol_wire::write_message(&mut writer, &data).await?;

        Ok(SubscriptionStream { reader })
    }

    fn reject<T>(resp: Response) -> Result<T, ClientError> {
        match resp {
            Response::Error { message, .. } => Err(ClientError::Rejected(message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }
}

/// A live stream of [`Envelope`]s from a `Subscribe` request. Reads one
/// message at a time with no overall timeout — the stream is expected to
/// idle between events.
pub struct SubscriptionStream {
    reader: tokio::net::unix::OwnedReadHalf,
}

impl SubscriptionStream {
    /// Read the next event off the subscription, or `None` on disconnect.
    pub async fn next(&mut self) -> Result<Option<Envelope>, ClientError> {
        match protocol_wire::read_message(&mut self.reader).await {
            Ok(bytes) => {
                let response: Response = protocol_wire::decode(&bytes)?;
                match response {
                    Response::Event(envelope) => Ok(Some(*envelope)),
                    _ => Err(ClientError::UnexpectedResponse),
                }
            }
            Err(ProtocolError::ConnectionClosed) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

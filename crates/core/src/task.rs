// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The central unit of work: a dispatched background Task and its state
//! machine (spec §3, §4.8).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::user::UserId;

crate::define_id! {
    /// Six-hex-prefix task identifier; the full UUID is carried separately
    /// as `sessionUuid`.
    pub struct TaskId;
}

/// The kind of coding agent a Task is dispatched to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Coding,
    Frontend,
    Research,
    #[serde(other)]
    Other,
}

/// One entry in a Task's ordered activity log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Task lifecycle state (spec §4.8). `Ord` is declaration order and has no
/// dispatch meaning; use [`TaskState::can_transition_to`] for validity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl TaskState {
    /// Whether this is one of the three terminal states.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Stopped
        )
    }

    /// Validates a proposed transition against the monotone state machine
    /// in spec §4.8: `pending -> running -> {completed, failed, stopped}`,
    /// with `pending -> failed` allowed directly (admission denied, never
    /// ran). Terminal states accept no further transitions.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        match (self, next) {
            (Pending, Running) => true,
            (Pending, Failed) => true,
            (Running, Completed | Failed | Stopped) => true,
            _ => false,
        }
    }
}

/// The central unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub session_uuid: uuid::Uuid,
    pub user_id: UserId,
    pub description: String,
    pub model: String,
    pub agent_kind: AgentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
    pub workspace: std::path::PathBuf,
    pub branch: String,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub activity_log: Vec<ActivityEntry>,
}

impl Task {
    /// Constructs a freshly admitted Task in `pending` state.
    pub fn new(
        id: TaskId,
        session_uuid: uuid::Uuid,
        user_id: UserId,
        description: impl Into<String>,
        model: impl Into<String>,
        agent_kind: AgentKind,
        workspace: std::path::PathBuf,
        now: DateTime<Utc>,
    ) -> Self {
        let branch = format!("task/{id}");
        Self {
            id,
            session_uuid,
            user_id,
            description: description.into(),
            model: model.into(),
            agent_kind,
            workflow: None,
            workspace,
            branch,
            state: TaskState::Pending,
            created_at: now,
            updated_at: now,
            pid: None,
            result: None,
            error: None,
            activity_log: Vec::new(),
        }
    }

    /// Appends an activity-log entry, bumping `updated_at`.
    pub fn log_activity(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.activity_log.push(ActivityEntry {
            timestamp: now,
            message: message.into(),
        });
        self.updated_at = now;
    }

    /// Applies a validated transition, enforcing the `pid` invariants from
    /// spec §3 (running requires a pid; terminal states clear it).
    pub fn transition(&mut self, next: TaskState, now: DateTime<Utc>) -> Result<(), String> {
        if !self.state.can_transition_to(next) {
            return Err(format!("illegal transition {:?} -> {next:?}", self.state));
        }
        if next == TaskState::Running && self.pid.is_none() {
            return Err("running requires a live pid".to_string());
        }
        if next.is_terminal() {
            self.pid = None;
        }
        self.state = next;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The durable event log's payload type. Every externally visible mutation
//! to a Task, ToolEvent, Session, or the cost ledger is represented here
//! before being applied to in-memory state, so the WAL can replay the
//! entire materialized view from a snapshot plus a tail of events.
//!
//! `apply_event` handlers in the storage layer must be idempotent: replaying
//! the same event twice (e.g. after a crash mid-flush) must leave state
//! identical to applying it once. Prefer assignment over mutation, guard
//! inserts with existence checks, and guard counter bumps with a status
//! check on the target entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cost::ModelCost;
use crate::message::Message;
use crate::task::{ActivityEntry, AgentKind, TaskId, TaskState};
use crate::tool_event::{ErrorCategory, Phase};
use crate::usage::TokenUsage;
use crate::user::UserId;

/// One durable fact about a state change, as appended to the write-ahead
/// log and folded into `MaterializedState`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    TaskCreated {
        task_id: TaskId,
        session_uuid: uuid::Uuid,
        user_id: UserId,
        description: String,
        model: String,
        agent_kind: AgentKind,
        workspace: std::path::PathBuf,
        branch: String,
        timestamp: DateTime<Utc>,
    },
    TaskTransitioned {
        task_id: TaskId,
        state: TaskState,
        pid: Option<u32>,
        timestamp: DateTime<Utc>,
    },
    TaskActivityAppended {
        task_id: TaskId,
        entry: ActivityEntry,
    },
    TaskResultSet {
        task_id: TaskId,
        result: Option<String>,
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },
    ToolEventRecorded {
        task_id: TaskId,
        session_uuid: uuid::Uuid,
        tool: String,
        timestamp: DateTime<Utc>,
        parameters: serde_json::Value,
    },
    ToolEventFinalized {
        task_id: TaskId,
        session_uuid: uuid::Uuid,
        tool: String,
        pre_timestamp: DateTime<Utc>,
        phase: Phase,
        output_preview: String,
        output_length: u64,
        has_error: bool,
        error_category: Option<ErrorCategory>,
        duration_millis: f64,
        usage: Option<TokenUsage>,
        file_paths: Vec<String>,
    },
    ToolEventOrphanExpired {
        task_id: TaskId,
        session_uuid: uuid::Uuid,
        tool: String,
        pre_timestamp: DateTime<Utc>,
    },
    CostRecorded {
        /// Dedup key (typically the originating ToolEvent's correlation
        /// key) so replay cannot double-count the same usage.
        source_key: String,
        date: chrono::NaiveDate,
        model: String,
        delta: ModelCost,
        timestamp: DateTime<Utc>,
    },
    SessionMessageAppended {
        user_id: UserId,
        message: Message,
    },
    SessionCleared {
        user_id: UserId,
        timestamp: DateTime<Utc>,
    },
    SessionWorkspaceSet {
        user_id: UserId,
        workspace: std::path::PathBuf,
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    /// The entity this event primarily mutates, for routing/logging.
    pub fn kind_tag(&self) -> &'static str {
        match self {
            Event::TaskCreated { .. } => "task_created",
            Event::TaskTransitioned { .. } => "task_transitioned",
            Event::TaskActivityAppended { .. } => "task_activity_appended",
            Event::TaskResultSet { .. } => "task_result_set",
            Event::ToolEventRecorded { .. } => "tool_event_recorded",
            Event::ToolEventFinalized { .. } => "tool_event_finalized",
            Event::ToolEventOrphanExpired { .. } => "tool_event_orphan_expired",
            Event::CostRecorded { .. } => "cost_recorded",
            Event::SessionMessageAppended { .. } => "session_message_appended",
            Event::SessionCleared { .. } => "session_cleared",
            Event::SessionWorkspaceSet { .. } => "session_workspace_set",
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;

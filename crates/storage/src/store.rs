// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The durable store (C1): the public facade other crates use to mutate
//! and query orchestration state. Wraps a [`Wal`] and [`MaterializedState`]
//! behind a single mutex, appending an [`Event`] for every externally
//! visible mutation before applying it in place.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tf_core::{
    ActivityEntry, AgentKind, CoreError, CostLedger, Event, Message, Session, Task, TaskId,
    TaskState, ToolEvent, UserId,
};
use thiserror::Error;

use crate::{MaterializedState, Snapshot, SnapshotError, Wal, WalError};

/// Errors surfaced by the durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("wal error: {0}")]
    Wal(#[from] WalError),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Core(e) => e,
            other => CoreError::new(tf_core::ErrorKind::Unknown, other.to_string()),
        }
    }
}

/// Number of write-contention retries before a caller-visible `conflict`
/// is surfaced (spec §7).
const WRITE_RETRY_LIMIT: usize = 5;

struct Inner {
    wal: Wal,
    state: MaterializedState,
}

/// Thread-safe handle to the durable store. Cheap to clone (an `Arc`
/// around a single mutex), matching the teacher's `EventBus` sharing
/// pattern in `daemon/src/event_bus.rs`.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Mutex<Inner>>,
    snapshot_path: PathBuf,
}

impl Store {
    /// Opens (or creates) the store at `dir`, replaying the WAL on top of
    /// the last snapshot if one exists.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;
        let snapshot_path = dir.join("snapshot.json");
        let wal_path = dir.join("wal.jsonl");

        let snapshot = Snapshot::load(&snapshot_path)?;
        let (mut state, processed_seq) = match snapshot {
            Some(s) => (s.state, s.seq),
            None => (MaterializedState::default(), 0),
        };

        let wal = Wal::open(&wal_path, processed_seq)?;
        for entry in wal.entries_after(processed_seq)? {
            state.apply_event(&entry.event);
        }

        Ok(Self {
            inner: Arc::new(Mutex::new(Inner { wal, state })),
            snapshot_path,
        })
    }

    /// Appends an event, retrying on transient write contention up to
    /// [`WRITE_RETRY_LIMIT`] times before surfacing `conflict` (spec §7).
    fn commit(&self, event: Event) -> Result<(), StoreError> {
        let mut last_err = None;
        for _ in 0..WRITE_RETRY_LIMIT {
            let mut guard = self.inner.lock();
            match guard.wal.append(&event) {
                Ok(_) => {
                    guard.state.apply_event(&event);
                    if guard.wal.needs_flush() {
                        guard.wal.flush()?;
                    }
                    return Ok(());
                }
                Err(e) => {
                    last_err = Some(e);
                }
            }
        }
        Err(StoreError::Core(CoreError::conflict(format!(
            "write contention exhausted retries: {:?}",
            last_err.map(|e| e.to_string())
        ))))
    }

    /// Forces a flush of any buffered WAL writes.
    pub fn flush(&self) -> Result<(), StoreError> {
        Ok(self.inner.lock().wal.flush()?)
    }

    /// Synchronous checkpoint + WAL truncation, for graceful shutdown.
    pub fn checkpoint_and_truncate(&self) -> Result<(), StoreError> {
        let mut guard = self.inner.lock();
        guard.wal.flush()?;
        let seq = guard.wal.write_seq();
        let snapshot = Snapshot::new(seq, guard.state.clone());
        snapshot.save(&self.snapshot_path)?;
        guard.wal.mark_processed(seq);
        guard.wal.truncate_before(seq)?;
        Ok(())
    }

    // ---- Task operations (C1 per spec §4.1/§4.8) ----

    #[allow(clippy::too_many_arguments)]
    pub fn create_task(
        &self,
        task_id: TaskId,
        session_uuid: uuid::Uuid,
        user_id: UserId,
        description: String,
        model: String,
        agent_kind: AgentKind,
        workspace: PathBuf,
        branch: String,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Task, StoreError> {
        self.commit(Event::TaskCreated {
            task_id: task_id.clone(),
            session_uuid,
            user_id,
            description,
            model,
            agent_kind,
            workspace,
            branch,
            timestamp: now,
        })?;
        self.get_task(task_id.as_str())
            .ok_or_else(|| StoreError::Core(CoreError::not_found("task vanished after create")))
    }

    /// Validates the transition against [`TaskState::can_transition_to`]
    /// before appending the event, surfacing `conflict` on violation.
    pub fn update_task_state(
        &self,
        task_id: &TaskId,
        next: TaskState,
        pid: Option<u32>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), StoreError> {
        let current = {
            let guard = self.inner.lock();
            guard
                .state
                .tasks
                .get(task_id)
                .map(|t| t.state)
                .ok_or_else(|| CoreError::not_found(format!("no such task {task_id}")))?
        };
        if !current.can_transition_to(next) {
            return Err(StoreError::Core(CoreError::conflict(format!(
                "illegal transition {current:?} -> {next:?}"
            ))));
        }
        if next == TaskState::Running && pid.is_none() {
            return Err(StoreError::Core(CoreError::conflict(
                "running requires a live pid",
            )));
        }
        self.commit(Event::TaskTransitioned {
            task_id: task_id.clone(),
            state: next,
            pid,
            timestamp: now,
        })
    }

    pub fn append_activity(
        &self,
        task_id: &TaskId,
        message: String,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), StoreError> {
        self.commit(Event::TaskActivityAppended {
            task_id: task_id.clone(),
            entry: ActivityEntry {
                timestamp: now,
                message,
            },
        })
    }

    pub fn set_task_result(
        &self,
        task_id: &TaskId,
        result: Option<String>,
        error: Option<String>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), StoreError> {
        self.commit(Event::TaskResultSet {
            task_id: task_id.clone(),
            result,
            error,
            timestamp: now,
        })
    }

    pub fn get_task(&self, id: &str) -> Option<Task> {
        self.inner.lock().state.get_task(id).cloned()
    }

    /// Lists tasks, optionally filtered to a single user and/or state,
    /// newest-created first.
    pub fn list_tasks(&self, user_id: Option<&UserId>, state: Option<TaskState>) -> Vec<Task> {
        let guard = self.inner.lock();
        let mut tasks: Vec<Task> = guard
            .state
            .tasks
            .values()
            .filter(|t| match user_id {
                Some(u) => &t.user_id == u,
                None => true,
            })
            .filter(|t| match state {
                Some(s) => t.state == s,
                None => true,
            })
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }

    // ---- ToolEvent operations (C1 per spec §4.4) ----

    pub fn record_tool_pre(
        &self,
        task_id: &TaskId,
        session_uuid: uuid::Uuid,
        tool: String,
        timestamp: chrono::DateTime<chrono::Utc>,
        parameters: serde_json::Value,
    ) -> Result<(), StoreError> {
        self.commit(Event::ToolEventRecorded {
            task_id: task_id.clone(),
            session_uuid,
            tool,
            timestamp,
            parameters,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_tool_post(
        &self,
        task_id: &TaskId,
        session_uuid: uuid::Uuid,
        tool: String,
        pre_timestamp: chrono::DateTime<chrono::Utc>,
        output_preview: String,
        output_length: u64,
        has_error: bool,
        error_category: Option<tf_core::ErrorCategory>,
        duration_millis: f64,
        usage: Option<tf_core::TokenUsage>,
        file_paths: Vec<String>,
    ) -> Result<(), StoreError> {
        self.commit(Event::ToolEventFinalized {
            task_id: task_id.clone(),
            session_uuid,
            tool,
            pre_timestamp,
            phase: tf_core::Phase::Post,
            output_preview,
            output_length,
            has_error,
            error_category,
            duration_millis,
            usage,
            file_paths,
        })
    }

    pub fn expire_orphan_tool_event(
        &self,
        task_id: &TaskId,
        session_uuid: uuid::Uuid,
        tool: String,
        pre_timestamp: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), StoreError> {
        self.commit(Event::ToolEventOrphanExpired {
            task_id: task_id.clone(),
            session_uuid,
            tool,
            pre_timestamp,
        })
    }

    pub fn tool_events_for_task(&self, task_id: &TaskId) -> Vec<ToolEvent> {
        self.inner
            .lock()
            .state
            .tool_events
            .values()
            .filter(|ev| &ev.task_id == task_id)
            .cloned()
            .collect()
    }

    // ---- Session operations (C3 per spec §4.3) ----

    pub fn append_message(&self, user_id: UserId, message: Message) -> Result<(), StoreError> {
        self.commit(Event::SessionMessageAppended { user_id, message })
    }

    pub fn clear_session(
        &self,
        user_id: UserId,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), StoreError> {
        self.commit(Event::SessionCleared {
            user_id,
            timestamp: now,
        })
    }

    pub fn set_session_workspace(
        &self,
        user_id: UserId,
        workspace: PathBuf,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), StoreError> {
        self.commit(Event::SessionWorkspaceSet {
            user_id,
            workspace,
            timestamp: now,
        })
    }

    pub fn get_session(&self, user_id: &UserId) -> Option<Session> {
        self.inner.lock().state.sessions.get(user_id).cloned()
    }

    // ---- Cost ledger operations (C9 per spec §6) ----

    pub fn record_cost(
        &self,
        source_key: String,
        date: chrono::NaiveDate,
        model: String,
        delta: tf_core::ModelCost,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), StoreError> {
        self.commit(Event::CostRecorded {
            source_key,
            date,
            model,
            delta,
            timestamp: now,
        })
    }

    pub fn cost_ledger(&self) -> CostLedger {
        self.inner.lock().state.cost_ledger.clone()
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;

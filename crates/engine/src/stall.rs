// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stall detection (C8's periodic half, spec §4.8 "Stall detection"): a
//! `running` Task whose pid has died *and* whose most recent ToolEvent is
//! older than the stall window is promoted to `failed / errorCategory =
//! unknown` (spec §8 scenario S6). Distinct from the wall-clock timeout
//! enforced by [`crate::taskmanager`]'s own supervised wait (spec §8 "Stall
//! vs timeout").

use std::time::Duration;

use chrono::{DateTime, Utc};
use tf_adapters::is_pid_alive;
use tf_core::{Clock, Task, TaskId, TaskState};
use tf_storage::Store;

/// A Task with no live pid is only stalled once its tool-event stream has
/// gone quiet for this long (spec §4.8: "older than 2 minutes").
const STALL_TOOL_EVENT_WINDOW_MS: i64 = 120_000;

/// Sweep cadence (spec §4.8: "interval 30 s").
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Periodically promotes stalled `running` Tasks to `failed`.
#[derive(Clone)]
pub struct StallSweeper<C: Clock> {
    store: Store,
    clock: C,
}

impl<C: Clock> StallSweeper<C> {
    pub fn new(store: Store, clock: C) -> Self {
        Self { store, clock }
    }

    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.clock.epoch_ms() as i64).unwrap_or_else(Utc::now)
    }

    /// Runs a single sweep pass, returning the ids of Tasks it promoted.
    pub fn sweep_once(&self) -> Vec<TaskId> {
        let now = self.now();
        let mut promoted = Vec::new();
        for task in self.store.list_tasks(None, Some(TaskState::Running)) {
            if self.is_stalled(&task, now) {
                let _ = self
                    .store
                    .update_task_state(&task.id, TaskState::Failed, None, now);
                let _ = self.store.set_task_result(
                    &task.id,
                    None,
                    Some("stalled: errorCategory=unknown".to_string()),
                    now,
                );
                tracing::warn!(task_id = %task.id, "promoted stalled task to failed");
                promoted.push(task.id);
            }
        }
        promoted
    }

    fn is_stalled(&self, task: &Task, now: DateTime<Utc>) -> bool {
        if task.pid.is_some_and(is_pid_alive) {
            return false;
        }
        let last_activity = self
            .store
            .tool_events_for_task(&task.id)
            .into_iter()
            .map(|event| event.timestamp)
            .max()
            .unwrap_or(task.updated_at);
        now.signed_duration_since(last_activity).num_milliseconds() > STALL_TOOL_EVENT_WINDOW_MS
    }

    /// Spawns a background task that calls [`Self::sweep_once`] on
    /// [`SWEEP_INTERVAL`] until the returned handle is aborted or dropped.
    pub fn spawn(self) -> tokio::task::JoinHandle<()>
    where
        C: 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                self.sweep_once();
            }
        })
    }
}

#[cfg(test)]
#[path = "stall_tests.rs"]
mod tests;

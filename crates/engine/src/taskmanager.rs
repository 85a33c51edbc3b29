// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task Manager (C8): owns the Task state machine end to end — admission,
//! workspace allocation, dispatch to the worker pool, agent supervision,
//! merge-or-fail finalization, and explicit stop (spec §4.8).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tf_adapters::{kill, spawn, RunOutcome, SpawnConfig, WorkingCopyManager};
use tf_core::{AgentKind, Clock, CoreError, ErrorKind, IdGen, Priority, Task, TaskId, TaskState, UserId};
use tf_storage::Store;
use tokio::sync::oneshot;

use crate::gate::Gate;
use crate::pool::WorkerPool;

/// Everything the Task Manager needs to invoke the coding-agent subprocess
/// that isn't derived from the Task itself (spec §6 "Agent subprocess
/// contract").
#[derive(Debug, Clone)]
pub struct TaskManagerConfig {
    pub agent_command: String,
    pub agent_args: Vec<String>,
    pub log_dir: PathBuf,
    pub task_timeout: Duration,
    pub model_api_key_var: String,
    pub model_api_key_value: String,
}

/// Owns the Task lifecycle (spec §4.8). Cloning shares the store, pool,
/// workspace manager, gate, and the stop-signal registry.
pub struct TaskManager<C: Clock, G: IdGen> {
    store: Store,
    pool: WorkerPool,
    workspace_mgr: WorkingCopyManager,
    gate: Gate,
    config: TaskManagerConfig,
    clock: C,
    id_gen: G,
    stop_signals: Arc<Mutex<HashMap<TaskId, oneshot::Sender<()>>>>,
}

impl<C: Clock, G: IdGen> Clone for TaskManager<C, G> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            pool: self.pool.clone(),
            workspace_mgr: self.workspace_mgr.clone(),
            gate: self.gate.clone(),
            config: self.config.clone(),
            clock: self.clock.clone(),
            id_gen: self.id_gen.clone(),
            stop_signals: Arc::clone(&self.stop_signals),
        }
    }
}

impl<C: Clock, G: IdGen> TaskManager<C, G> {
    pub fn new(
        store: Store,
        pool: WorkerPool,
        workspace_mgr: WorkingCopyManager,
        gate: Gate,
        config: TaskManagerConfig,
        clock: C,
        id_gen: G,
    ) -> Self {
        Self {
            store,
            pool,
            workspace_mgr,
            gate,
            config,
            clock,
            id_gen,
            stop_signals: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.clock.epoch_ms() as i64).unwrap_or_else(Utc::now)
    }

    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.store.get_task(task_id)
    }

    pub fn list(&self, user_id: Option<&UserId>, state: Option<TaskState>) -> Vec<Task> {
        self.store.list_tasks(user_id, state)
    }

    /// Admits, allocates a workspace for, and dispatches a new background
    /// Task. Admission (rate limit, budget, workspace allocation) happens
    /// before any Task row is created: on denial there is nothing to roll
    /// back (spec §4.9 "the Task is not created"; scenario S5).
    pub async fn submit(
        &self,
        user_id: UserId,
        description: String,
        model: String,
        agent_kind: AgentKind,
        priority: Priority,
    ) -> Result<Task, CoreError> {
        let now = self.now();
        self.gate.check_admission(&user_id, now)?;

        let task_id = TaskId::new(self.id_gen.next());
        let workspace_path = self
            .workspace_mgr
            .allocate(task_id.as_str())
            .await
            .map_err(|err| CoreError::new(ErrorKind::Unknown, err.to_string()))?;

        let session_uuid = uuid::Uuid::new_v4();
        let branch = format!("task/{task_id}");
        let task = self
            .store
            .create_task(
                task_id,
                session_uuid,
                user_id,
                description,
                model,
                agent_kind,
                workspace_path,
                branch,
                now,
            )
            .map_err(CoreError::from)?;

        self.dispatch(task.clone(), priority);
        Ok(task)
    }

    fn dispatch(&self, task: Task, priority: Priority) {
        let manager = self.clone();
        self.pool.submit(priority, move || async move {
            manager.run_task(task).await;
        });
    }

    /// Spawns the agent, supervises it to completion (or stop/timeout),
    /// and finalizes the Task's terminal state.
    async fn run_task(&self, task: Task) {
        let task_id = task.id.clone();
        let log_path = self.config.log_dir.join(format!("{task_id}.log"));
        let spawn_config = SpawnConfig {
            command: self.config.agent_command.clone(),
            args: self.config.agent_args.clone(),
            workspace_path: task.workspace.clone(),
            agent_kind: format!("{:?}", task.agent_kind).to_lowercase(),
            session_uuid: task.session_uuid,
            model_api_key_var: self.config.model_api_key_var.clone(),
            model_api_key_value: self.config.model_api_key_value.clone(),
            log_path,
            timeout: self.config.task_timeout,
        };

        let running = match spawn(&spawn_config).await {
            Ok(running) => running,
            Err(err) => {
                tracing::warn!(%task_id, error = %err, "agent spawn failed");
                let now = self.now();
                let _ = self.store.update_task_state(&task_id, TaskState::Failed, None, now);
                let _ = self
                    .store
                    .set_task_result(&task_id, None, Some(err.to_string()), now);
                return;
            }
        };
        let pid = running.pid();

        let now = self.now();
        if let Err(err) = self
            .store
            .update_task_state(&task_id, TaskState::Running, Some(pid), now)
        {
            tracing::warn!(%task_id, error = %err, "failed to record running state");
        }
        let _ = self.store.append_activity(&task_id, "agent started".to_string(), now);

        let (stop_tx, stop_rx) = oneshot::channel();
        self.stop_signals.lock().insert(task_id.clone(), stop_tx);

        let wait_future = running.wait(self.config.task_timeout);
        tokio::pin!(wait_future);
        let outcome = tokio::select! {
            res = &mut wait_future => match res {
                Ok(outcome) => outcome,
                Err(err) => {
                    tracing::warn!(%task_id, error = %err, "agent wait failed");
                    RunOutcome::Failed { exit_code: None }
                }
            },
            _ = stop_rx => {
                kill(pid).await;
                RunOutcome::Stopped
            }
        };
        self.stop_signals.lock().remove(&task_id);

        self.finalize(&task_id, outcome).await;
    }

    async fn finalize(&self, task_id: &TaskId, outcome: RunOutcome) {
        let now = self.now();
        match outcome {
            RunOutcome::Success { result } => match self.workspace_mgr.merge(task_id.as_str()).await {
                Ok(merge) => {
                    tracing::info!(%task_id, merge_commit = %merge.merge_commit, "task merged");
                    let _ = self.store.update_task_state(task_id, TaskState::Completed, None, now);
                    let _ = self.store.set_task_result(task_id, Some(result), None, now);
                }
                Err(err) => {
                    tracing::warn!(%task_id, error = %err, "merge failed, leaving workspace in place");
                    let _ = self.store.update_task_state(task_id, TaskState::Failed, None, now);
                    let _ = self.store.set_task_result(
                        task_id,
                        None,
                        Some(format!("merge failed: {err}")),
                        now,
                    );
                }
            },
            RunOutcome::Failed { exit_code } => {
                let _ = self.store.update_task_state(task_id, TaskState::Failed, None, now);
                let _ = self.store.set_task_result(
                    task_id,
                    None,
                    Some(format!("agent exited with {exit_code:?}")),
                    now,
                );
            }
            RunOutcome::TimedOut => {
                let _ = self.store.update_task_state(task_id, TaskState::Failed, None, now);
                let _ = self
                    .store
                    .set_task_result(task_id, None, Some("timed out".to_string()), now);
            }
            RunOutcome::Stopped => {
                let _ = self.store.update_task_state(task_id, TaskState::Stopped, None, now);
                let _ = self.store.set_task_result(
                    task_id,
                    None,
                    Some("stopped by user".to_string()),
                    now,
                );
            }
        }
        self.workspace_mgr.preserve(task_id.as_str());
    }

    /// Stops a Task (spec §4.8 "Explicit stop"). Idempotent: a no-op on an
    /// already-terminal Task. A still-`running` Task is interrupted via the
    /// in-flight supervisor's stop channel (falling back to a direct kill
    /// by pid in case of a registration race); a `pending` Task that never
    /// reached `running` has no process to interrupt, so it is failed
    /// directly — the state machine has no `pending -> stopped` edge.
    pub async fn stop(&self, task_id: &TaskId) -> Result<(), CoreError> {
        let now = self.now();
        let Some(task) = self.store.get_task(task_id.as_str()) else {
            return Err(CoreError::not_found(format!("no such task {task_id}")));
        };
        if task.state.is_terminal() {
            return Ok(());
        }

        if task.state == TaskState::Running {
            if let Some(stop_tx) = self.stop_signals.lock().remove(task_id) {
                let _ = stop_tx.send(());
            }
            if let Some(pid) = task.pid {
                kill(pid).await;
            }
        } else {
            let _ = self.store.update_task_state(task_id, TaskState::Failed, None, now);
            let _ = self.store.set_task_result(
                task_id,
                None,
                Some("stopped before running".to_string()),
                now,
            );
        }
        Ok(())
    }

    pub async fn stop_all_user_tasks(&self, user_id: &UserId) -> Result<(), CoreError> {
        for task in self.store.list_tasks(Some(user_id), None) {
            if !task.state.is_terminal() {
                self.stop(&task.id).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "taskmanager_tests.rs"]
mod tests;

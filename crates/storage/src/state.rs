// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Materialized state from WAL replay

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tf_core::{CostLedger, Event, Phase, Session, Task, TaskId, ToolEvent, UserId};

/// Correlation key for a `pre`/`post` ToolEvent pair (spec §4.4):
/// `(sessionUuid, tool, nearest-prior pre timestamp)`.
fn tool_event_key(
    session_uuid: &uuid::Uuid,
    tool: &str,
    pre_timestamp: &chrono::DateTime<chrono::Utc>,
) -> String {
    format!("{session_uuid}:{tool}:{}", pre_timestamp.to_rfc3339())
}

/// Materialized state built by folding [`Event`]s over a base snapshot.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MaterializedState {
    pub tasks: HashMap<TaskId, Task>,
    pub sessions: HashMap<UserId, Session>,
    pub tool_events: HashMap<String, ToolEvent>,
    pub cost_ledger: CostLedger,
    /// Dedup set of `CostRecorded.source_key`s already folded in, so a
    /// replayed cost event cannot double-count usage.
    #[serde(default)]
    applied_cost_keys: HashSet<String>,
}

impl MaterializedState {
    /// Get a task by ID or unique hex prefix (task IDs are themselves a
    /// 6-hex prefix of a UUID, but callers may supply a shorter prefix).
    pub fn get_task(&self, id: &str) -> Option<&Task> {
        if let Some(task) = self.tasks.get(&TaskId::new(id)) {
            return Some(task);
        }
        let matches: Vec<_> = self
            .tasks
            .iter()
            .filter(|(k, _)| k.as_str().starts_with(id))
            .collect();
        if matches.len() == 1 {
            Some(matches[0].1)
        } else {
            None
        }
    }

    /// Apply an event to derive state changes.
    ///
    /// # Idempotency requirement
    ///
    /// All handlers MUST be idempotent: applying the same event twice must
    /// leave state identical to applying it once. This matters because an
    /// event may be folded in twice in ordinary operation — once
    /// optimistically at submission time for immediate read-your-writes
    /// visibility, and again when the daemon's event-bus reader loop picks
    /// the same entry off the WAL. Guidelines:
    /// - Prefer assignment (`=`) over mutation (`+=`, `-=`).
    /// - Guard inserts with existence checks.
    /// - Guard counter/ledger updates with an explicit dedup key.
    /// - Guard append-only logs by checking the last entry isn't already
    ///   the one being applied.
    pub fn apply_event(&mut self, event: &Event) {
        match event {
            Event::TaskCreated {
                task_id,
                session_uuid,
                user_id,
                description,
                model,
                agent_kind,
                workspace,
                branch,
                timestamp,
            } => {
                if !self.tasks.contains_key(task_id) {
                    let mut task = Task::new(
                        task_id.clone(),
                        *session_uuid,
                        user_id.clone(),
                        description.clone(),
                        model.clone(),
                        agent_kind.clone(),
                        workspace.clone(),
                        *timestamp,
                    );
                    task.branch = branch.clone();
                    self.tasks.insert(task_id.clone(), task);
                }
            }
            Event::TaskTransitioned {
                task_id,
                state,
                pid,
                timestamp,
            } => {
                if let Some(task) = self.tasks.get_mut(task_id) {
                    task.state = *state;
                    task.pid = *pid;
                    if task.updated_at < *timestamp {
                        task.updated_at = *timestamp;
                    }
                }
            }
            Event::TaskActivityAppended { task_id, entry } => {
                if let Some(task) = self.tasks.get_mut(task_id) {
                    let already_present =
                        task.activity_log.last().is_some_and(|last| last == entry);
                    if !already_present {
                        task.activity_log.push(entry.clone());
                        if task.updated_at < entry.timestamp {
                            task.updated_at = entry.timestamp;
                        }
                    }
                }
            }
            Event::TaskResultSet {
                task_id,
                result,
                error,
                timestamp,
            } => {
                if let Some(task) = self.tasks.get_mut(task_id) {
                    task.result = result.clone();
                    task.error = error.clone();
                    if task.updated_at < *timestamp {
                        task.updated_at = *timestamp;
                    }
                }
            }
            Event::ToolEventRecorded {
                task_id,
                session_uuid,
                tool,
                timestamp,
                parameters,
            } => {
                let key = tool_event_key(session_uuid, tool, timestamp);
                self.tool_events.entry(key).or_insert_with(|| {
                    ToolEvent::from_pre(
                        task_id.clone(),
                        *session_uuid,
                        *timestamp,
                        tool.clone(),
                        parameters.clone(),
                    )
                });
            }
            Event::ToolEventFinalized {
                session_uuid,
                tool,
                pre_timestamp,
                output_preview,
                output_length,
                has_error,
                error_category,
                duration_millis,
                usage,
                file_paths,
                ..
            } => {
                let key = tool_event_key(session_uuid, tool, pre_timestamp);
                if let Some(ev) = self.tool_events.get_mut(&key) {
                    if ev.phase == Phase::Pre {
                        ev.finalize_with_post(
                            output_preview.clone(),
                            *output_length,
                            *has_error,
                            *error_category,
                            *duration_millis,
                            *usage,
                            file_paths.clone(),
                        );
                    }
                }
            }
            Event::ToolEventOrphanExpired {
                session_uuid,
                tool,
                pre_timestamp,
                ..
            } => {
                let key = tool_event_key(session_uuid, tool, pre_timestamp);
                if let Some(ev) = self.tool_events.get_mut(&key) {
                    if ev.is_pending() {
                        ev.expire_as_orphan();
                    }
                }
            }
            Event::CostRecorded {
                source_key,
                date,
                model,
                delta,
                timestamp,
            } => {
                if self.applied_cost_keys.insert(source_key.clone()) {
                    let day_key = date.format("%Y-%m-%d").to_string();
                    let month_key = date.format("%Y-%m").to_string();
                    Self::add_model_cost(
                        self.cost_ledger
                            .daily
                            .entry(day_key)
                            .or_default()
                            .entry(model.clone())
                            .or_default(),
                        delta,
                    );
                    Self::add_model_cost(
                        self.cost_ledger
                            .monthly
                            .entry(month_key)
                            .or_default()
                            .entry(model.clone())
                            .or_default(),
                        delta,
                    );
                    self.cost_ledger.total_cost_usd += delta.cost_usd;
                    self.cost_ledger.last_updated = *timestamp;
                }
            }
            Event::SessionMessageAppended { user_id, message } => {
                let session = self.sessions.entry(user_id.clone()).or_insert_with(|| {
                    Session::new(user_id.clone(), message.timestamp, tf_core::DEFAULT_HISTORY_LIMIT)
                });
                let already_present = session.history.back().is_some_and(|last| last == message);
                if !already_present {
                    session.append(message.clone(), message.timestamp);
                }
            }
            Event::SessionCleared { user_id, timestamp } => {
                if let Some(session) = self.sessions.get_mut(user_id) {
                    session.clear(*timestamp);
                }
            }
            Event::SessionWorkspaceSet {
                user_id,
                workspace,
                timestamp,
            } => {
                let session = self.sessions.entry(user_id.clone()).or_insert_with(|| {
                    Session::new(user_id.clone(), *timestamp, tf_core::DEFAULT_HISTORY_LIMIT)
                });
                session.set_workspace(workspace.clone(), *timestamp);
            }
        }
    }

    fn add_model_cost(entry: &mut tf_core::ModelCost, delta: &tf_core::ModelCost) {
        entry.input += delta.input;
        entry.output += delta.output;
        entry.cache_create += delta.cache_create;
        entry.cache_read += delta.cache_read;
        entry.cost_usd += delta.cost_usd;
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;

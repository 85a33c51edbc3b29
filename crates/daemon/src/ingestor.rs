// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wires C4 hook ingestion into the running daemon: polls [`Store`] for
//! newly `running` Tasks and starts a [`HookTailer`] on each one, folding
//! its [`IngestedEvent`]s into durable `ToolEvent`s and onto the `tools`
//! fan-out channel.
//!
//! Grounded on the teacher's periodic-reconciliation idiom
//! (`lifecycle.rs`'s interval-driven background tasks): rather than have
//! `tf-engine`'s `TaskManager` depend on `tf-daemon`'s `Fanout` or
//! `tf-adapters`'s tailer, the daemon polls outward from `Store` so the
//! crate dependency graph stays one-directional.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tf_adapters::{HookTailer, IngestedEvent};
use tf_core::{ErrorCategory, TaskId, TaskState, UserId};
use tf_storage::Store;
use uuid::Uuid;

use crate::fanout::Fanout;

/// How often the ingestor checks for newly-running Tasks that don't yet
/// have a tailer.
const SCAN_INTERVAL: Duration = Duration::from_secs(1);

/// Polls `store` for running Tasks and keeps one [`HookTailer`] per
/// session alive for as long as that Task remains tracked.
pub async fn run(store: Store, fanout: Fanout, sessions_root: PathBuf) {
    let tailer = HookTailer::new(sessions_root);
    let mut seen: HashSet<Uuid> = HashSet::new();
    let mut scan = tokio::time::interval(SCAN_INTERVAL);

    loop {
        scan.tick().await;
        for task in store.list_tasks(None, Some(TaskState::Running)) {
            if !seen.insert(task.session_uuid) {
                continue;
            }
            let rx = tailer.watch_session(task.session_uuid);
            tokio::spawn(drain(
                store.clone(),
                fanout.clone(),
                task.id,
                task.user_id,
                rx,
            ));
        }
    }
}

/// Per-(tool) bookkeeping for a single session's in-flight pre events,
/// needed because `Store::record_tool_post` correlates on the matching
/// pre's timestamp rather than its own.
type PendingPre = HashMap<String, (DateTime<Utc>, BTreeSet<String>)>;

async fn drain(
    store: Store,
    fanout: Fanout,
    task_id: TaskId,
    user_id: UserId,
    mut rx: tokio::sync::mpsc::Receiver<IngestedEvent>,
) {
    let mut pending: PendingPre = HashMap::new();

    while let Some(event) = rx.recv().await {
        match event {
            IngestedEvent::Pre {
                session_uuid,
                tool,
                timestamp,
                parameters,
                file_paths,
            } => {
                if store
                    .record_tool_pre(&task_id, session_uuid, tool.clone(), timestamp, parameters)
                    .is_ok()
                {
                    pending.insert(tool, (timestamp, file_paths));
                }
            }
            IngestedEvent::Post {
                session_uuid,
                tool,
                timestamp: _,
                output,
                output_length,
                has_error,
                duration_millis,
                usage,
                file_paths: post_paths,
            } => {
                let (pre_timestamp, mut file_paths) = pending
                    .remove(&tool)
                    .unwrap_or_else(|| (Utc::now(), BTreeSet::new()));
                file_paths.extend(post_paths);

                let error_category = has_error.then_some(ErrorCategory::Unknown);
                let commit_result = store.record_tool_post(
                    &task_id,
                    session_uuid,
                    tool.clone(),
                    pre_timestamp,
                    output,
                    output_length,
                    has_error,
                    error_category,
                    duration_millis,
                    usage,
                    file_paths.into_iter().collect(),
                );
                if commit_result.is_ok() {
                    if let Some(finalized) = store
                        .tool_events_for_task(&task_id)
                        .into_iter()
                        .find(|ev| ev.session_uuid == session_uuid && ev.timestamp == pre_timestamp && ev.tool == tool)
                    {
                        fanout.publish_tool(user_id.clone(), finalized);
                    }
                }
            }
        }
    }
}

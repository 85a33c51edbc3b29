// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tool-use records ingested from the agent hook channel (spec §3, §4.4).

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::TaskId;
use crate::usage::TokenUsage;

/// Which half of a tool invocation a record represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Pre,
    Post,
}

/// Classification of a failed tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    FileNotFound,
    PermissionDenied,
    Timeout,
    CommandFailed,
    SyntaxError,
    Unknown,
}

/// One tool-invocation record. Created by a `pre` hook event with
/// `success = None`; finalized in place by the matching `post` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolEvent {
    pub task_id: TaskId,
    pub session_uuid: uuid::Uuid,
    pub timestamp: DateTime<Utc>,
    pub tool: String,
    pub phase: Phase,
    pub parameters: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_length: Option<u64>,
    /// `None` while still `pre`; `Some` once a `post` has finalized it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_error: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_millis: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(default)]
    pub file_paths: BTreeSet<String>,
}

impl ToolEvent {
    /// Constructs the record created by a `pre` hook event.
    pub fn from_pre(
        task_id: TaskId,
        session_uuid: uuid::Uuid,
        timestamp: DateTime<Utc>,
        tool: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            task_id,
            session_uuid,
            timestamp,
            tool: tool.into(),
            phase: Phase::Pre,
            parameters,
            output_preview: None,
            output_length: None,
            has_error: None,
            error_category: None,
            duration_millis: None,
            usage: None,
            file_paths: BTreeSet::new(),
        }
    }

    /// Finalizes a pre record in place with the matching post payload.
    pub fn finalize_with_post(
        &mut self,
        output_preview: String,
        output_length: u64,
        has_error: bool,
        error_category: Option<ErrorCategory>,
        duration_millis: f64,
        usage: Option<TokenUsage>,
        extra_file_paths: impl IntoIterator<Item = String>,
    ) {
        self.phase = Phase::Post;
        self.output_preview = Some(output_preview);
        self.output_length = Some(output_length);
        self.has_error = Some(has_error);
        self.error_category = error_category;
        self.duration_millis = Some(duration_millis);
        self.usage = usage;
        self.file_paths.extend(extra_file_paths);
    }

    /// True while this record is an unmatched `pre` awaiting a `post`.
    pub fn is_pending(&self) -> bool {
        self.phase == Phase::Pre && self.has_error.is_none()
    }

    /// Marks an orphaned `pre` record as expired per spec §4.4's 10-minute
    /// unmatched-pre grace window.
    pub fn expire_as_orphan(&mut self) {
        self.phase = Phase::Post;
        self.has_error = Some(true);
        self.error_category = Some(ErrorCategory::Unknown);
    }
}

#[cfg(test)]
#[path = "tool_event_tests.rs"]
mod tests;

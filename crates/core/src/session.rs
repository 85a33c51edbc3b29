// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-user chat session and bounded message history (spec §3, §4.3).

use std::collections::VecDeque;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::user::UserId;

/// Maximum number of retained messages before the oldest is evicted.
/// Overridable via the `SESSION_HISTORY_LIMIT` config key.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// One user's chat session: at most one per user, reloaded at startup,
/// never time-expired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub history: VecDeque<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_workspace: Option<PathBuf>,
    #[serde(skip, default = "default_history_limit")]
    history_limit: usize,
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

impl Session {
    pub fn new(user_id: UserId, now: DateTime<Utc>, history_limit: usize) -> Self {
        Self {
            user_id,
            created_at: now,
            last_activity_at: now,
            history: VecDeque::new(),
            current_workspace: None,
            history_limit,
        }
    }

    /// Appends a message, evicting the oldest entry once `history_limit`
    /// is exceeded.
    pub fn append(&mut self, message: Message, now: DateTime<Utc>) {
        self.history.push_back(message);
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
        self.last_activity_at = now;
    }

    /// Returns the most recent `n` messages, oldest first.
    pub fn recent(&self, n: usize) -> Vec<&Message> {
        let skip = self.history.len().saturating_sub(n);
        self.history.iter().skip(skip).collect()
    }

    pub fn clear(&mut self, now: DateTime<Utc>) {
        self.history.clear();
        self.current_workspace = None;
        self.last_activity_at = now;
    }

    pub fn set_workspace(&mut self, path: PathBuf, now: DateTime<Utc>) {
        self.current_workspace = Some(path);
        self.last_activity_at = now;
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;

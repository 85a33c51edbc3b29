// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session & History orchestration (C3): a thin convenience layer over
//! [`tf_storage::Store`]'s session operations, plus the bounded-context
//! extraction the classifier needs (spec §4.3, §4.10).

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tf_core::{InputKind, Message, Session, TokenUsage, UserId};
use tf_storage::{Store, StoreError};

/// Per-message truncation applied when building classifier context (spec
/// §4.10: "2 recent messages @500 chars").
pub const CONTEXT_MESSAGE_CHAR_LIMIT: usize = 500;

/// Thin wrapper over [`Store`]'s session operations. Cloning shares the
/// same underlying store.
#[derive(Clone)]
pub struct SessionManager {
    store: Store,
}

impl SessionManager {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn record_user_message(
        &self,
        user_id: UserId,
        content: impl Into<String>,
        input_kind: InputKind,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut message = Message::user(content, now);
        message.input_kind = Some(input_kind);
        self.store.append_message(user_id, message)
    }

    pub fn record_assistant_message(
        &self,
        user_id: UserId,
        content: impl Into<String>,
        model: impl Into<String>,
        usage: TokenUsage,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.store
            .append_message(user_id, Message::assistant(content, now, model, usage))
    }

    pub fn clear(&self, user_id: UserId, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.store.clear_session(user_id, now)
    }

    pub fn set_workspace(
        &self,
        user_id: UserId,
        workspace: PathBuf,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.store.set_session_workspace(user_id, workspace, now)
    }

    pub fn get(&self, user_id: &UserId) -> Option<Session> {
        self.store.get_session(user_id)
    }

    /// The most recent `n` messages for `user_id`, each truncated to
    /// [`CONTEXT_MESSAGE_CHAR_LIMIT`] characters, oldest first — the bounded
    /// context window the classifier is allowed to see (spec §4.10).
    pub fn recent_context(&self, user_id: &UserId, n: usize) -> Vec<String> {
        let Some(session) = self.store.get_session(user_id) else {
            return Vec::new();
        };
        session
            .recent(n)
            .into_iter()
            .map(|message| truncate_chars(&message.content, CONTEXT_MESSAGE_CHAR_LIMIT))
            .collect()
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;

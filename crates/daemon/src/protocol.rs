// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The daemon's IPC vocabulary: the Submission, Control, and Subscription
//! APIs of spec §6, expressed as a `Request`/`Response` pair carried by
//! [`crate::protocol_wire`]'s length-prefixed JSON framing.

use serde::{Deserialize, Serialize};
use tf_core::{ErrorKind, InputKind, Priority, Task, TaskState, UserId};

pub use crate::fanout::{Channel, Envelope, Scope};

/// A request sent from `tf` (or any other client) to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Version handshake, sent once per connection before anything else.
    Hello { version: String },

    /// Submission API: `submitMessage(userId, content, inputKind,
    /// priority)` (spec §6).
    SubmitMessage {
        user_id: UserId,
        content: String,
        input_kind: InputKind,
        priority: Priority,
    },

    /// Control API (spec §6), all idempotent.
    StopTask { task_id: String },
    StopAllUserTasks { user_id: UserId },
    ClearSession { user_id: UserId },

    /// Read-only queries over Tasks, used by `tf list`/`tf show`.
    GetTask { task_id: String },
    ListTasks {
        user_id: Option<UserId>,
        state: Option<TaskState>,
    },

    /// Subscription API: `subscribe(scope, channel) -> stream<Event>`
    /// (spec §6, §4.11). After a `Subscribe` request the connection
    /// switches to a one-way stream of `Response::Event` messages until
    /// the client disconnects.
    Subscribe { scope: Scope, channel: Channel },

    Status,
    Shutdown { kill: bool },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub uptime_secs: u64,
    pub tasks_pending: usize,
    pub tasks_running: usize,
    pub workers_busy: usize,
    pub workers_total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    Hello { version: String },

    /// `submitMessage` answered directly, no Task created.
    Answer { text: String },
    /// `submitMessage` dispatched a background Task.
    Accepted { task_id: String, user_reply_text: String },

    Task(Box<Task>),
    Tasks(Vec<Task>),

    /// One message on a subscribed fan-out channel.
    Event(Box<Envelope>),

    Status(StatusSnapshot),

    Ok,
    ShuttingDown,
    Error { kind: ErrorKind, message: String },
}

impl Response {
    pub fn from_core_error(err: tf_core::CoreError) -> Self {
        Response::Error {
            kind: err.kind,
            message: err.message,
        }
    }
}

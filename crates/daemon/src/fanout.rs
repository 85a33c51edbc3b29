// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Live Fan-out (C11, spec §4.11): three logical channels (`tasks`,
//! `tools`, `metrics`) with best-effort, lossy delivery and a bounded
//! per-subscriber backlog. Built on `tokio::sync::broadcast`, whose
//! `Lagged` error on an overflowing bounded buffer *is* the drop policy —
//! no custom eviction bookkeeping is needed. Scope filtering (`user(id)`
//! vs `admin`) is left to callers of [`Fanout::subscribe`]; this type is
//! deliberately scope-agnostic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tf_core::{Task, ToolEvent, UserId};
use tokio::sync::broadcast;

/// Bounded backlog per channel (spec §4.11: "e.g. 256 pending messages").
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channel {
    Tasks,
    Tools,
    Metrics,
}

/// A subscriber's requested visibility. `User` sees only its own events;
/// `Admin` sees everything across all users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    User(UserId),
    Admin,
}

impl Scope {
    /// Whether an event owned by `owner` (`None` for channel-wide events
    /// such as metrics snapshots) is visible under this scope.
    pub fn admits(&self, owner: Option<&UserId>) -> bool {
        match (self, owner) {
            (Scope::Admin, _) => true,
            (Scope::User(_), None) => true,
            (Scope::User(id), Some(owner)) => owner == id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub tasks_pending: usize,
    pub tasks_running: usize,
    pub workers_busy: usize,
    pub workers_total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Payload {
    Task(Task),
    ToolEvent(ToolEvent),
    Metrics(MetricsSnapshot),
}

/// One message on a fan-out channel (spec §4.11: "Events carry
/// `{sequence, timestamp, payload}`").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub channel: Channel,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    /// Owning user, for scope filtering. `None` for channel-wide events
    /// (e.g. metrics) that every scope admits.
    pub user_id: Option<UserId>,
    pub payload: Payload,
}

#[derive(Clone)]
pub struct Fanout {
    tasks_tx: broadcast::Sender<Envelope>,
    tools_tx: broadcast::Sender<Envelope>,
    metrics_tx: broadcast::Sender<Envelope>,
    seq_tasks: Arc<AtomicU64>,
    seq_tools: Arc<AtomicU64>,
    seq_metrics: Arc<AtomicU64>,
}

impl Default for Fanout {
    fn default() -> Self {
        Self::new()
    }
}

impl Fanout {
    pub fn new() -> Self {
        let (tasks_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (tools_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (metrics_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tasks_tx,
            tools_tx,
            metrics_tx,
            seq_tasks: Arc::new(AtomicU64::new(0)),
            seq_tools: Arc::new(AtomicU64::new(0)),
            seq_metrics: Arc::new(AtomicU64::new(0)),
        }
    }

    fn sender(&self, channel: Channel) -> &broadcast::Sender<Envelope> {
        match channel {
            Channel::Tasks => &self.tasks_tx,
            Channel::Tools => &self.tools_tx,
            Channel::Metrics => &self.metrics_tx,
        }
    }

    fn next_seq(&self, channel: Channel) -> u64 {
        let counter = match channel {
            Channel::Tasks => &self.seq_tasks,
            Channel::Tools => &self.seq_tools,
            Channel::Metrics => &self.seq_metrics,
        };
        counter.fetch_add(1, Ordering::Relaxed)
    }

    fn publish(&self, channel: Channel, user_id: Option<UserId>, payload: Payload) {
        let envelope = Envelope {
            channel,
            sequence: self.next_seq(channel),
            timestamp: Utc::now(),
            user_id,
            payload,
        };
        // Sending with no subscribers is not an error: most of the
        // daemon's lifetime may have zero live `subscribe` streams.
        let _ = self.sender(channel).send(envelope);
    }

    pub fn publish_task(&self, task: Task) {
        self.publish(Channel::Tasks, Some(task.user_id.clone()), Payload::Task(task));
    }

    pub fn publish_tool(&self, user_id: UserId, event: ToolEvent) {
        self.publish(Channel::Tools, Some(user_id), Payload::ToolEvent(event));
    }

    pub fn publish_metrics(&self, snapshot: MetricsSnapshot) {
        self.publish(Channel::Metrics, None, Payload::Metrics(snapshot));
    }

    pub fn subscribe(&self, channel: Channel) -> broadcast::Receiver<Envelope> {
        self.sender(channel).subscribe()
    }
}

#[cfg(test)]
#[path = "fanout_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-user queue (C7): independent FIFO per user plus a priority override
//! slot, at most one handler in flight per user, unbounded concurrency
//! across users.
//!
//! Grounded on the same `daemon::event_bus` wake-on-demand shape as
//! [`crate::pool`], narrowed from one shared queue to one queue (and one
//! lazily-spawned drain task) per user.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use tf_core::UserId;

type BoxedJob = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Default)]
struct UserState {
    fifo: VecDeque<BoxedJob>,
    overrides: VecDeque<BoxedJob>,
    draining: bool,
}

/// Dispatches per-user message handlers (spec §4.7). Cloning shares the
/// same underlying per-user state.
#[derive(Clone, Default)]
pub struct UserQueue {
    users: Arc<Mutex<HashMap<UserId, UserState>>>,
}

impl UserQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues `job` for `user_id`. `priority_override` items are pulled
    /// ahead of any plain FIFO entry for the same user but never interrupt
    /// an already in-flight handler (spec §4.7).
    pub fn enqueue<F, Fut>(&self, user_id: UserId, priority_override: bool, job: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: BoxedJob = Box::pin(job());
        let need_spawn = {
            let mut users = self.users.lock();
            let state = users.entry(user_id).or_default();
            if priority_override {
                state.overrides.push_back(boxed);
            } else {
                state.fifo.push_back(boxed);
            }
            if state.draining {
                false
            } else {
                state.draining = true;
                true
            }
        };
        if need_spawn {
            tokio::spawn(Self::drain(Arc::clone(&self.users), user_id));
        }
    }

    /// Whether a handler is currently in flight (or queued to run) for
    /// `user_id`.
    pub fn is_draining(&self, user_id: UserId) -> bool {
        self.users
            .lock()
            .get(&user_id)
            .is_some_and(|state| state.draining)
    }

    async fn drain(users: Arc<Mutex<HashMap<UserId, UserState>>>, user_id: UserId) {
        loop {
            let job = {
                let mut guard = users.lock();
                let Some(state) = guard.get_mut(&user_id) else {
                    return;
                };
                let next = state
                    .overrides
                    .pop_front()
                    .or_else(|| state.fifo.pop_front());
                if next.is_none() {
                    state.draining = false;
                }
                next
            };
            match job {
                Some(job) => job.await,
                None => return,
            }
        }
    }
}

#[cfg(test)]
#[path = "userqueue_tests.rs"]
mod tests;

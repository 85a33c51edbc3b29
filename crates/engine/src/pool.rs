// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded priority worker pool (C6): at most W concurrent agent
//! invocations, priority-scheduled with strict FIFO inside a tier.
//!
//! Grounded on the teacher's `daemon::event_bus::EventBus`/`EventReader`
//! shape (a `parking_lot::Mutex`-guarded shared structure plus a
//! `tokio::sync::Notify`/channel wake signal consumed by a loop), adapted
//! from a single WAL reader to W independent consumers draining one
//! priority queue.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tf_core::{DispatchKey, Priority};
use tokio::sync::{oneshot, Notify};

type BoxedJob = Pin<Box<dyn Future<Output = ()> + Send>>;

enum QueueItem {
    Work { key: DispatchKey, job: BoxedJob },
    Shutdown { key: DispatchKey },
}

impl QueueItem {
    fn key(&self) -> DispatchKey {
        match self {
            QueueItem::Work { key, .. } | QueueItem::Shutdown { key } => *key,
        }
    }
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}
impl Eq for QueueItem {}
impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueueItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

/// A cancellable handle to a submitted job plus its completion signal.
pub struct JobHandle {
    cancelled: Arc<AtomicBool>,
    done: oneshot::Receiver<()>,
}

impl JobHandle {
    /// Best-effort cancel: has no effect once the job has started running.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Waits for the job to finish (or be skipped via cancellation).
    pub async fn wait(self) {
        let _ = self.done.await;
    }
}

/// Snapshot of pool occupancy (spec §4.6 `status()`).
#[derive(Debug, Clone, Copy)]
pub struct PoolStatus {
    pub workers: usize,
    pub active_workers: usize,
    pub queued_jobs: usize,
}

struct Shared {
    queue: Mutex<BinaryHeap<Reverse<QueueItem>>>,
    notify: Notify,
    counter: AtomicU64,
    active: AtomicUsize,
    workers: usize,
}

/// Bounded pool of `workers` tokio tasks consuming a single priority queue
/// (spec §4.6). Cloning shares the same underlying queue and workers.
#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// Spawns `workers` consumer tasks and returns the handle used to
    /// submit work to them.
    pub fn new(workers: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            counter: AtomicU64::new(0),
            active: AtomicUsize::new(0),
            workers,
        });
        for _ in 0..workers {
            tokio::spawn(Self::worker_loop(Arc::clone(&shared)));
        }
        Self { shared }
    }

    fn next_counter(&self) -> u64 {
        self.shared.counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Non-blocking enqueue; returns a cancellable handle and a completion
    /// future (spec §4.6 `submit`).
    pub fn submit<F, Fut>(&self, priority: Priority, job: F) -> JobHandle
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let key = DispatchKey {
            priority,
            counter: self.next_counter(),
        };
        let cancelled = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = oneshot::channel();
        let cancelled_for_job = Arc::clone(&cancelled);
        let boxed: BoxedJob = Box::pin(async move {
            if !cancelled_for_job.load(Ordering::SeqCst) {
                job().await;
            }
            let _ = done_tx.send(());
        });
        self.shared
            .queue
            .lock()
            .push(Reverse(QueueItem::Work { key, job: boxed }));
        self.shared.notify.notify_one();
        JobHandle {
            cancelled,
            done: done_rx,
        }
    }

    /// Enqueues one shutdown sentinel per worker at `LOW` priority (spec
    /// §4.6): each worker finishes whatever it is draining and exits once
    /// it reaches its sentinel.
    pub fn shutdown(&self) {
        for _ in 0..self.shared.workers {
            let key = DispatchKey {
                priority: Priority::Low,
                counter: self.next_counter(),
            };
            self.shared
                .queue
                .lock()
                .push(Reverse(QueueItem::Shutdown { key }));
        }
        self.shared.notify.notify_waiters();
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            workers: self.shared.workers,
            active_workers: self.shared.active.load(Ordering::SeqCst),
            queued_jobs: self.shared.queue.lock().len(),
        }
    }

    async fn worker_loop(shared: Arc<Shared>) {
        loop {
            let popped = shared.queue.lock().pop();
            let Some(Reverse(item)) = popped else {
                shared.notify.notified().await;
                continue;
            };
            match item {
                QueueItem::Shutdown { .. } => return,
                QueueItem::Work { job, .. } => {
                    shared.active.fetch_add(1, Ordering::SeqCst);
                    job.await;
                    shared.active.fetch_sub(1, Ordering::SeqCst);
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;

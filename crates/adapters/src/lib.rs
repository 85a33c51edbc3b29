// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
// Enable coverage(off) attribute for excluding test infrastructure
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Adapters for external I/O: the working-copy manager, the hook ingestor,
//! and the agent subprocess runner.

pub mod ingest;
pub mod runner;
pub mod subprocess;
pub mod workspace;

pub use ingest::{
    extract_post_file_paths, extract_pre_file_paths, hook_poll_interval, DisplayDedup,
    HookTailer, IngestedEvent, RawHookRecord,
};
pub use runner::{
    is_pid_alive, kill, spawn, RunnerError, RunOutcome, RunningAgent, SpawnConfig,
    DEFAULT_TASK_TIMEOUT, KILL_GRACE_PERIOD,
};
pub use workspace::{MergeOutcome, WorkingCopyManager, WorkspaceError};

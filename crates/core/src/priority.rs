// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Priority tiers for queue dispatch order (spec §4.6, §4.7).

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Priority tier. Lower numeric value sorts first (dispatched sooner).
///
/// `Ord` is derived in declaration order, which matches the desired
/// min-heap behavior directly: `Priority::Urgent < Priority::Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Urgent = 0,
    High = 1,
    Normal = 2,
    Low = 3,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Priority::Urgent => "urgent",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        };
        write!(f, "{s}")
    }
}

/// A (priority, submission counter) key for a priority queue entry.
///
/// Ties are broken by the monotonically increasing submission counter so
/// dispatch order within a tier is strict FIFO (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchKey {
    pub priority: Priority,
    pub counter: u64,
}

impl Ord for DispatchKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // Lower priority value first, then lower counter first.
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.counter.cmp(&other.counter))
    }
}

impl PartialOrd for DispatchKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
#[path = "priority_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The error-kind taxonomy shared across crate boundaries (spec §7).
//!
//! Internal crates keep precise `thiserror` enums (`WalError`, `RunnerError`,
//! ...). [`CoreError`] is the externally visible vocabulary those errors
//! collapse into once they cross a component boundary (daemon protocol
//! responses, CLI output, dashboard rendering).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Taxonomy of externally visible error kinds (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Referenced task/user/session absent.
    NotFound,
    /// State-transition predicate violated; workspace exists.
    Conflict,
    /// Token-bucket empty.
    RateLimited,
    /// Day/month cost cap hit.
    BudgetExceeded,
    /// Injection heuristic fired.
    MaliciousInput,
    /// Non-zero exit or crash.
    SubprocessFailed,
    /// Wall-clock cap hit.
    Timeout,
    /// Stall sweep promoted the task.
    Stalled,
    /// Working-copy merge aborted.
    MergeConflict,
    /// Anything else.
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::BudgetExceeded => "budget_exceeded",
            ErrorKind::MaliciousInput => "malicious_input",
            ErrorKind::SubprocessFailed => "subprocess_failed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Stalled => "stalled",
            ErrorKind::MergeConflict => "merge_conflict",
            ErrorKind::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// An error carrying the externally-visible taxonomy plus a human message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    pub fn budget_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BudgetExceeded, message)
    }

    pub fn malicious_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MaliciousInput, message)
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for CoreError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;

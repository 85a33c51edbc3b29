// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token accounting shared by `Message`, `ToolEvent`, and `CostLedger`.

use serde::{Deserialize, Serialize};

/// Four-counter token usage, matching the hook record / model-provider shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input: u64,
    #[serde(default)]
    pub output: u64,
    #[serde(default)]
    pub cache_create: u64,
    #[serde(default)]
    pub cache_read: u64,
}

impl TokenUsage {
    pub fn new(input: u64, output: u64, cache_create: u64, cache_read: u64) -> Self {
        Self {
            input,
            output,
            cache_create,
            cache_read,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.input == 0 && self.output == 0 && self.cache_create == 0 && self.cache_read == 0
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input += other.input;
        self.output += other.output;
        self.cache_create += other.cache_create;
        self.cache_read += other.cache_read;
    }
}

impl std::ops::Add for TokenUsage {
    type Output = TokenUsage;
    fn add(self, rhs: Self) -> Self::Output {
        let mut out = self;
        out.add(&rhs);
        out
    }
}

#[cfg(test)]
#[path = "usage_tests.rs"]
mod tests;

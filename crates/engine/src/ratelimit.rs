// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token-bucket rate limiting (part of C9): per-user per-minute and
//! per-user per-hour buckets plus one global per-second bucket.
//!
//! Time is passed in by the caller as epoch milliseconds rather than read
//! from a clock held here, matching `tf_storage::Store`'s `now` parameters
//! so the whole write path stays deterministic under `FakeClock` in tests.

use std::collections::HashMap;

use parking_lot::Mutex;
use tf_core::UserId;

const MINUTE_MS: u64 = 60_000;
const HOUR_MS: u64 = 3_600_000;
const SECOND_MS: u64 = 1_000;

/// Default per-user/global limits (spec §4.9).
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub per_user_per_minute: u32,
    pub per_user_per_hour: u32,
    pub global_per_second: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_user_per_minute: 30,
            per_user_per_hour: 500,
            global_per_second: 30,
        }
    }
}

#[derive(Debug, Clone)]
struct Bucket {
    capacity: f64,
    window_ms: u64,
    tokens: f64,
    last_refill_ms: u64,
}

impl Bucket {
    fn new(capacity: u32, window_ms: u64, now_ms: u64) -> Self {
        Self {
            capacity: capacity as f64,
            window_ms,
            tokens: capacity as f64,
            last_refill_ms: now_ms,
        }
    }

    /// Refills to `now_ms`, then attempts to take one token. On failure
    /// returns the number of milliseconds until a token becomes available.
    fn try_acquire(&mut self, now_ms: u64) -> Result<(), u64> {
        let elapsed = now_ms.saturating_sub(self.last_refill_ms) as f64;
        let refill = elapsed * self.capacity / self.window_ms as f64;
        self.tokens = (self.tokens + refill).min(self.capacity);
        self.last_refill_ms = now_ms;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - self.tokens;
            let wait_ms = (deficit * self.window_ms as f64 / self.capacity).ceil() as u64;
            Err(wait_ms.max(1))
        }
    }
}

/// Per-user and global token buckets (spec §4.9). Cloning shares state.
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    global: std::sync::Arc<Mutex<Bucket>>,
    per_user_minute: std::sync::Arc<Mutex<HashMap<UserId, Bucket>>>,
    per_user_hour: std::sync::Arc<Mutex<HashMap<UserId, Bucket>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, now_ms: u64) -> Self {
        Self {
            global: std::sync::Arc::new(Mutex::new(Bucket::new(
                config.global_per_second,
                SECOND_MS,
                now_ms,
            ))),
            per_user_minute: std::sync::Arc::new(Mutex::new(HashMap::new())),
            per_user_hour: std::sync::Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    /// Checks (and, on success, consumes) one token from every applicable
    /// bucket for `user_id`. All three buckets are evaluated against a
    /// trial copy first so a deny never partially drains the others; on
    /// deny returns the longest of the reported waits (spec §4.9: "returns
    /// the remaining wait in milliseconds").
    pub fn check(&self, user_id: &UserId, now_ms: u64) -> Result<(), u64> {
        let mut minute_guard = self.per_user_minute.lock();
        let minute_bucket = minute_guard
            .entry(user_id.clone())
            .or_insert_with(|| Bucket::new(self.config.per_user_per_minute, MINUTE_MS, now_ms));
        let mut minute_trial = minute_bucket.clone();
        let minute_result = minute_trial.try_acquire(now_ms);

        let mut hour_guard = self.per_user_hour.lock();
        let hour_bucket = hour_guard
            .entry(user_id.clone())
            .or_insert_with(|| Bucket::new(self.config.per_user_per_hour, HOUR_MS, now_ms));
        let mut hour_trial = hour_bucket.clone();
        let hour_result = hour_trial.try_acquire(now_ms);

        let mut global_guard = self.global.lock();
        let mut global_trial = global_guard.clone();
        let global_result = global_trial.try_acquire(now_ms);

        let longest_wait = [minute_result, hour_result, global_result]
            .into_iter()
            .filter_map(Result::err)
            .max();
        if let Some(wait_ms) = longest_wait {
            return Err(wait_ms);
        }

        *minute_bucket = minute_trial;
        *hour_bucket = hour_trial;
        *global_guard = global_trial;
        Ok(())
    }
}

#[cfg(test)]
#[path = "ratelimit_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cost & Rate Gate (C9): unifies token accounting against [`PriceTable`],
//! daily/monthly budget enforcement, and [`RateLimiter`] into the single
//! admission check the Task Manager and the classifier's direct-answer
//! path both call through.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tf_core::{CoreError, ModelCost, TokenUsage, UserId};
use tf_storage::Store;
use thiserror::Error;

use crate::cost::{PriceTable, PriceTableError};
use crate::ratelimit::{RateLimitConfig, RateLimiter};

#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    Store(#[from] tf_storage::StoreError),
    #[error(transparent)]
    PriceTable(#[from] PriceTableError),
}

impl From<GateError> for CoreError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::Store(e) => e.into(),
            GateError::PriceTable(e) => CoreError::new(tf_core::ErrorKind::Unknown, e.to_string()),
        }
    }
}

/// `None` means unlimited (spec §4.9 "Configurable"; §10.3 "optional,
/// `None` means unlimited").
#[derive(Debug, Clone, Copy, Default)]
pub struct BudgetConfig {
    pub daily_limit_usd: Option<f64>,
    pub monthly_limit_usd: Option<f64>,
}

/// The unified admission gate (spec §4.9). Cloning shares the rate
/// limiter state, the store handle, and the current price table.
#[derive(Clone)]
pub struct Gate {
    store: Store,
    rate_limiter: RateLimiter,
    budget: BudgetConfig,
    price_table: Arc<Mutex<PriceTable>>,
}

impl Gate {
    pub fn new(
        store: Store,
        rate_config: RateLimitConfig,
        budget: BudgetConfig,
        price_table: PriceTable,
        now_ms: u64,
    ) -> Self {
        Self {
            store,
            rate_limiter: RateLimiter::new(rate_config, now_ms),
            budget,
            price_table: Arc::new(Mutex::new(price_table)),
        }
    }

    /// Replaces the in-memory price table from `path`. Only ever called on
    /// explicit administrative action; nothing in this crate watches the
    /// file for changes (spec §11).
    pub fn reload_price_table(&self, path: &Path) -> Result<(), GateError> {
        let table = PriceTable::load(path)?;
        *self.price_table.lock() = table;
        Ok(())
    }

    /// Admission check run before creating a Task and before each
    /// direct-answer call (spec §4.9): rate limit, then the current
    /// day/month budget totals against the configured limits. Returns
    /// `Err` with kind `rate_limited` or `budget_exceeded` on denial;
    /// neither case creates or mutates any durable state.
    pub fn check_admission(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<(), CoreError> {
        let now_ms = now.timestamp_millis().max(0) as u64;
        self.rate_limiter.check(user_id, now_ms).map_err(|wait_ms| {
            CoreError::rate_limited(format!("retry after {wait_ms}ms"))
        })?;

        let ledger = self.store.cost_ledger();
        let date = now.date_naive();
        if let Some(daily_limit) = self.budget.daily_limit_usd {
            if ledger.day_total(date) >= daily_limit {
                return Err(CoreError::budget_exceeded(format!(
                    "daily cost {:.4} USD has reached the {:.4} USD limit",
                    ledger.day_total(date),
                    daily_limit
                )));
            }
        }
        if let Some(monthly_limit) = self.budget.monthly_limit_usd {
            if ledger.month_total(date) >= monthly_limit {
                return Err(CoreError::budget_exceeded(format!(
                    "monthly cost {:.4} USD has reached the {:.4} USD limit",
                    ledger.month_total(date),
                    monthly_limit
                )));
            }
        }
        Ok(())
    }

    /// Records one model invocation's token usage against the ledger,
    /// pricing it from the current table (spec §4.9 "Token accounting").
    /// `source_key` is the idempotency key the durable store dedups on
    /// (a ToolEvent id or a direct-answer call id).
    pub fn record_usage(
        &self,
        source_key: String,
        model: &str,
        usage: &TokenUsage,
        now: DateTime<Utc>,
    ) -> Result<(), GateError> {
        if usage.is_zero() {
            return Ok(());
        }
        let pricing = self.price_table.lock().pricing_for(model);
        let cost_usd = pricing.cost_of(usage);
        let delta = ModelCost {
            input: usage.input,
            output: usage.output,
            cache_create: usage.cache_create,
            cache_read: usage.cache_read,
            cost_usd,
        };
        self.store
            .record_cost(source_key, now.date_naive(), model.to_string(), delta, now)?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "gate_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token/cost accounting ledger (spec §3, §6 "Cost ledger on-disk format").

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::usage::TokenUsage;

/// Per-model token counters plus derived USD cost for one day or month.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelCost {
    #[serde(default)]
    pub input: u64,
    #[serde(default)]
    pub output: u64,
    #[serde(default)]
    pub cache_create: u64,
    #[serde(default)]
    pub cache_read: u64,
    #[serde(default)]
    pub cost_usd: f64,
}

/// Per-million-token USD rates for a single model. Looked up from a
/// configurable price table (spec §11: explicit `reload_price_table`,
/// no file watcher).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
    pub cache_create_per_million: f64,
    pub cache_read_per_million: f64,
}

impl ModelPricing {
    pub fn cost_of(&self, usage: &TokenUsage) -> f64 {
        (usage.input as f64 / 1_000_000.0) * self.input_per_million
            + (usage.output as f64 / 1_000_000.0) * self.output_per_million
            + (usage.cache_create as f64 / 1_000_000.0) * self.cache_create_per_million
            + (usage.cache_read as f64 / 1_000_000.0) * self.cache_read_per_million
    }
}

/// Per-day and per-month aggregates keyed by date/month x model.
///
/// Written atomically (temp-file + rename) by the durable-store layer;
/// this type only holds and mutates the in-memory document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostLedger {
    #[serde(default)]
    pub daily: BTreeMap<String, BTreeMap<String, ModelCost>>,
    #[serde(default)]
    pub monthly: BTreeMap<String, BTreeMap<String, ModelCost>>,
    #[serde(default)]
    pub total_cost_usd: f64,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
}

impl CostLedger {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            daily: BTreeMap::new(),
            monthly: BTreeMap::new(),
            total_cost_usd: 0.0,
            last_updated: now,
        }
    }

    /// Records one model invocation's usage against both the daily and
    /// monthly buckets for `date`, updating the running total.
    pub fn record(
        &mut self,
        date: NaiveDate,
        model: &str,
        usage: &TokenUsage,
        pricing: &ModelPricing,
        now: DateTime<Utc>,
    ) {
        let cost = pricing.cost_of(usage);
        let day_key = date.format("%Y-%m-%d").to_string();
        let month_key = date.format("%Y-%m").to_string();

        let day_entry = self
            .daily
            .entry(day_key)
            .or_default()
            .entry(model.to_string())
            .or_default();
        Self::accumulate(day_entry, usage, cost);

        let month_entry = self
            .monthly
            .entry(month_key)
            .or_default()
            .entry(model.to_string())
            .or_default();
        Self::accumulate(month_entry, usage, cost);

        self.total_cost_usd += cost;
        self.last_updated = now;
    }

    fn accumulate(entry: &mut ModelCost, usage: &TokenUsage, cost: f64) {
        entry.input += usage.input;
        entry.output += usage.output;
        entry.cache_create += usage.cache_create;
        entry.cache_read += usage.cache_read;
        entry.cost_usd += cost;
    }

    /// Sum of `cost_usd` across all models for `date`'s day bucket.
    pub fn day_total(&self, date: NaiveDate) -> f64 {
        let day_key = date.format("%Y-%m-%d").to_string();
        self.daily
            .get(&day_key)
            .map(|models| models.values().map(|m| m.cost_usd).sum())
            .unwrap_or(0.0)
    }

    /// Sum of `cost_usd` across all models for `date`'s month bucket.
    pub fn month_total(&self, date: NaiveDate) -> f64 {
        let month_key = date.format("%Y-%m").to_string();
        self.monthly
            .get(&month_key)
            .map(|models| models.values().map(|m| m.cost_usd).sum())
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
#[path = "cost_tests.rs"]
mod tests;

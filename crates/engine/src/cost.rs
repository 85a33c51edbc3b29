// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Price table (part of C9): per-model USD-per-million-token rates, loaded
//! from a TOML document and reloaded only on explicit administrative
//! action (spec §4.9, §11 "price-table hot doc, cold reload" — no file
//! watcher).

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tf_core::ModelPricing;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PriceTableError {
    #[error("io error reading price table: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed price table: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct TomlPricing {
    input_per_million: f64,
    output_per_million: f64,
    cache_create_per_million: f64,
    cache_read_per_million: f64,
}

impl From<TomlPricing> for ModelPricing {
    fn from(p: TomlPricing) -> Self {
        ModelPricing {
            input_per_million: p.input_per_million,
            output_per_million: p.output_per_million,
            cache_create_per_million: p.cache_create_per_million,
            cache_read_per_million: p.cache_read_per_million,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TomlDocument {
    default: TomlPricing,
    #[serde(default)]
    models: HashMap<String, TomlPricing>,
}

/// Per-model pricing, with a fallback used for any model absent from the
/// document. Immutable once loaded; [`crate::gate::Gate::reload_price_table`]
/// swaps in a freshly loaded replacement rather than mutating this in place.
#[derive(Debug, Clone)]
pub struct PriceTable {
    models: HashMap<String, ModelPricing>,
    default_pricing: ModelPricing,
}

impl PriceTable {
    pub fn load(path: &Path) -> Result<Self, PriceTableError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    fn parse(text: &str) -> Result<Self, PriceTableError> {
        let doc: TomlDocument = toml::from_str(text)?;
        Ok(Self {
            default_pricing: doc.default.into(),
            models: doc
                .models
                .into_iter()
                .map(|(model, pricing)| (model, pricing.into()))
                .collect(),
        })
    }

    /// A hardcoded fallback used before the first successful load and if a
    /// reload fails; keeps the gate usable without an on-disk price table.
    pub fn fallback() -> Self {
        Self {
            default_pricing: ModelPricing {
                input_per_million: 3.0,
                output_per_million: 15.0,
                cache_create_per_million: 3.75,
                cache_read_per_million: 0.3,
            },
            models: HashMap::new(),
        }
    }

    pub fn pricing_for(&self, model: &str) -> ModelPricing {
        self.models
            .get(model)
            .copied()
            .unwrap_or(self.default_pricing)
    }
}

#[cfg(test)]
#[path = "cost_tests.rs"]
mod tests;

//! Per-model pricing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{FinOpsError, Result};
use crate::types::usage::{Cost, Usage};

/// Price of one model in USD per million tokens.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ModelRate {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl ModelRate {
    pub const fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }

    /// `input/1e6 * input_rate + output/1e6 * output_rate`, broken down by direction.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> Cost {
        Cost::from_usage(
            &Usage::new(input_tokens, output_tokens),
            self.input_per_million,
            self.output_per_million,
        )
    }
}

const BUILTIN_RATES: &[(&str, ModelRate)] = &[
    ("claude-3-7-sonnet-20250219", ModelRate::new(3.0, 15.0)),
    (
        "us.anthropic.claude-3-7-sonnet-20250219-v1:0",
        ModelRate::new(3.0, 15.0),
    ),
    ("claude-sonnet-4-20250514", ModelRate::new(3.0, 15.0)),
    (
        "us.anthropic.claude-sonnet-4-20250514-v1:0",
        ModelRate::new(3.0, 15.0),
    ),
    ("claude-3-5-haiku-20241022", ModelRate::new(0.8, 4.0)),
];

/// Rate table keyed by model identifier.
///
/// Unknown models are a configuration error, never a silent zero cost.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct RateTable {
    rates: BTreeMap<String, ModelRate>,
}

impl RateTable {
    /// The rates shipped with the crate.
    pub fn builtin() -> Self {
        Self {
            rates: BUILTIN_RATES
                .iter()
                .map(|(id, rate)| (id.to_string(), *rate))
                .collect(),
        }
    }

    pub fn insert(&mut self, model_id: impl Into<String>, rate: ModelRate) {
        self.rates.insert(model_id.into(), rate);
    }

    /// Overlay another table; its entries win.
    pub fn extend(&mut self, other: RateTable) {
        self.rates.extend(other.rates);
    }

    pub fn get(&self, model_id: &str) -> Option<&ModelRate> {
        self.rates.get(model_id)
    }

    pub fn model_ids(&self) -> impl Iterator<Item = &str> {
        self.rates.keys().map(String::as_str)
    }

    pub fn rate(&self, model_id: &str) -> Result<&ModelRate> {
        self.get(model_id).ok_or_else(|| {
            FinOpsError::Config(format!("no rate-table entry for model '{model_id}'"))
        })
    }

    pub fn cost(&self, model_id: &str, usage: &Usage) -> Result<Cost> {
        Ok(self
            .rate(model_id)?
            .cost(usage.input_tokens, usage.output_tokens))
    }
}

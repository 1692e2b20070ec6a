//! Model pricing
//!
//! Prices are USD per one million tokens, keyed by `provider:model`. Lookups
//! fall back to a `provider:*` wildcard and then to the table default.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Result, RewindError};
use crate::llm::{ModelConfig, TokenUsage};

/// Price of one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub provider: String,
    /// Model name, or `*` for every model of the provider
    pub model: String,
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl ModelPrice {
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        input_per_million: f64,
        output_per_million: f64,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            input_per_million,
            output_per_million,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let valid = |p: f64| p.is_finite() && p >= 0.0;
        if !valid(self.input_per_million) || !valid(self.output_per_million) {
            return Err(RewindError::Configuration(format!(
                "invalid price for {}:{}",
                self.provider, self.model
            )));
        }
        Ok(())
    }

    fn key(&self) -> String {
        price_key(&self.provider, &self.model)
    }
}

fn price_key(provider: &str, model: &str) -> String {
    format!("{}:{}", provider.to_lowercase(), model.to_lowercase())
}

/// Per-model price table
#[derive(Debug, Clone)]
pub struct PricingTable {
    prices: HashMap<String, (f64, f64)>,
    default_price: (f64, f64),
}

impl PricingTable {
    /// Table with built-in approximate list prices
    pub fn new() -> Self {
        let mut table = Self::empty();

        // OpenAI (approximate)
        table.set_price(ModelPrice::new("openai", "gpt-4", 30.0, 60.0));
        table.set_price(ModelPrice::new("openai", "gpt-4-turbo", 10.0, 30.0));
        table.set_price(ModelPrice::new("openai", "gpt-4o", 2.5, 10.0));
        table.set_price(ModelPrice::new("openai", "gpt-4o-mini", 0.15, 0.6));
        table.set_price(ModelPrice::new("openai", "gpt-3.5-turbo", 0.5, 1.5));

        // Anthropic (approximate)
        table.set_price(ModelPrice::new("anthropic", "claude-3-opus", 15.0, 75.0));
        table.set_price(ModelPrice::new("anthropic", "claude-3-5-sonnet", 3.0, 15.0));
        table.set_price(ModelPrice::new("anthropic", "claude-3-haiku", 0.25, 1.25));

        // Groq (approximate)
        table.set_price(ModelPrice::new("groq", "llama-3-70b", 0.59, 0.79));
        table.set_price(ModelPrice::new("groq", "llama-3-8b", 0.05, 0.08));

        // Local models are free to run
        table.set_price(ModelPrice::new("ollama", "*", 0.0, 0.0));

        table
    }

    /// Table with no entries; every lookup uses the default price
    pub fn empty() -> Self {
        Self {
            prices: HashMap::new(),
            default_price: (1.0, 2.0),
        }
    }

    /// Built-in table plus the given overrides
    pub fn with_overrides(overrides: &[ModelPrice]) -> Self {
        let mut table = Self::new();
        for price in overrides {
            table.set_price(price.clone());
        }
        table
    }

    /// Add or replace the price of a model
    pub fn set_price(&mut self, price: ModelPrice) {
        self.prices
            .insert(price.key(), (price.input_per_million, price.output_per_million));
    }

    /// Price used for unknown models
    pub fn set_default_price(&mut self, input_per_million: f64, output_per_million: f64) {
        self.default_price = (input_per_million, output_per_million);
    }

    /// Per-million (input, output) price for a model
    pub fn price_of(&self, provider: &str, model: &str) -> (f64, f64) {
        self.lookup(Some(provider), model)
            .unwrap_or(self.default_price)
    }

    /// Price from an actual table entry, never the default.
    ///
    /// Without a provider the model is matched by name across providers;
    /// ties resolve to the alphabetically first provider.
    pub fn lookup(&self, provider: Option<&str>, model: &str) -> Option<(f64, f64)> {
        match provider {
            Some(provider) => self
                .prices
                .get(&price_key(provider, model))
                .or_else(|| self.prices.get(&price_key(provider, "*")))
                .copied(),
            None => {
                let model = model.to_lowercase();
                self.prices
                    .iter()
                    .filter(|(key, _)| key.split_once(':').is_some_and(|(_, m)| m == model))
                    .min_by(|a, b| a.0.cmp(b.0))
                    .map(|(_, price)| *price)
            }
        }
    }

    /// Cost of `usage` when the model has a known price
    pub fn known_cost(&self, provider: Option<&str>, model: &str, usage: &TokenUsage) -> Option<f64> {
        self.lookup(provider, model)
            .map(|price| usage_cost(price, usage))
    }

    /// Cost in USD of `usage` on the given model
    pub fn cost(&self, provider: &str, model: &str, usage: &TokenUsage) -> f64 {
        usage_cost(self.price_of(provider, model), usage)
    }

    /// Cost of `usage` under a model configuration
    pub fn cost_for(&self, config: &ModelConfig, usage: &TokenUsage) -> f64 {
        self.cost(&config.provider, &config.model, usage)
    }
}

fn usage_cost((input, output): (f64, f64), usage: &TokenUsage) -> f64 {
    (usage.prompt_tokens as f64 / 1_000_000.0) * input
        + (usage.completion_tokens as f64 / 1_000_000.0) * output
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::new()
    }
}

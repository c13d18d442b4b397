//! Per-model rate table and cost estimation.
//!
//! Metrics-only: estimates feed token/cost accounting and logs, and never
//! gate execution.

use std::collections::HashMap;

use super::types::TokenUsage;
use crate::models::DetailLevel;

/// USD rates for one model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelRates {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
    pub image_low: f64,
    pub image_high: f64,
}

impl ModelRates {
    pub fn image_rate(&self, detail: DetailLevel) -> f64 {
        match detail {
            DetailLevel::Low => self.image_low,
            // Auto is billed as high by the provider when in doubt.
            DetailLevel::High | DetailLevel::Auto => self.image_high,
        }
    }
}

/// Rate lookup by model name, with a fallback for unknown models.
#[derive(Debug, Clone)]
pub struct RateTable {
    rates: HashMap<String, ModelRates>,
    default: ModelRates,
}

impl RateTable {
    pub fn new(rates: HashMap<String, ModelRates>, default: ModelRates) -> Self {
        Self { rates, default }
    }

    pub fn rates_for(&self, model: &str) -> ModelRates {
        self.rates.get(model).copied().unwrap_or(self.default)
    }

    /// `inputTokens*inputRate + outputTokens*outputRate + imageCount*imageRate(detail)`.
    pub fn estimate(
        &self,
        model: &str,
        usage: TokenUsage,
        image_count: usize,
        detail: DetailLevel,
    ) -> f64 {
        let rates = self.rates_for(model);
        (usage.input_tokens as f64 / 1000.0) * rates.input_per_1k
            + (usage.output_tokens as f64 / 1000.0) * rates.output_per_1k
            + image_count as f64 * rates.image_rate(detail)
    }
}

impl Default for RateTable {
    fn default() -> Self {
        let mut rates = HashMap::new();
        rates.insert(
            "gpt-4o".to_string(),
            ModelRates {
                input_per_1k: 0.0025,
                output_per_1k: 0.01,
                image_low: 0.002125,
                image_high: 0.00765,
            },
        );
        rates.insert(
            "gpt-4o-mini".to_string(),
            ModelRates {
                input_per_1k: 0.00015,
                output_per_1k: 0.0006,
                image_low: 0.001275,
                image_high: 0.003825,
            },
        );
        let default = rates["gpt-4o-mini"];
        Self { rates, default }
    }
}

//! Model pricing
//!
//! A base `Price` plus ordered token-range bands. Bands are resolved against the
//! realized input/output token counts; the first matching band wins.

use super::usage::Usage;
use serde::{Deserialize, Serialize};

/// Default number of tokens a price applies to
pub const DEFAULT_PRICE_UNIT: u64 = 1000;

/// Token ranges a band applies to. A bound of 0 leaves that side open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceCondition {
    #[serde(default)]
    pub input_token_min: u64,
    #[serde(default)]
    pub input_token_max: u64,
    #[serde(default)]
    pub output_token_min: u64,
    #[serde(default)]
    pub output_token_max: u64,
}

impl PriceCondition {
    /// Whether both realized counts fall inside this condition's ranges
    pub fn contains(&self, input_tokens: u64, output_tokens: u64) -> bool {
        in_range(input_tokens, self.input_token_min, self.input_token_max)
            && in_range(output_tokens, self.output_token_min, self.output_token_max)
    }
}

fn in_range(value: u64, min: u64, max: u64) -> bool {
    (min == 0 || value >= min) && (max == 0 || value <= max)
}

/// One pricing band
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionalPrice {
    pub condition: PriceCondition,
    pub price: Price,
}

/// Price per `per_unit` tokens, with optional tiered bands
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Price {
    #[serde(default)]
    pub input_price: f64,
    #[serde(default)]
    pub output_price: f64,
    #[serde(default)]
    pub cached_price: f64,
    #[serde(default)]
    pub cache_creation_price: f64,
    #[serde(default)]
    pub image_input_price: f64,
    #[serde(default)]
    pub audio_input_price: f64,
    /// Price per web search call
    #[serde(default)]
    pub web_search_price: f64,
    /// Flat price charged once per request
    #[serde(default)]
    pub per_request_price: f64,
    /// Token unit the prices refer to (0 means 1000)
    #[serde(default)]
    pub per_unit: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditional_prices: Vec<ConditionalPrice>,
}

impl Price {
    /// Resolve the band for the realized counts, falling back to the base price
    pub fn select(&self, input_tokens: u64, output_tokens: u64) -> &Price {
        self.conditional_prices
            .iter()
            .find(|band| band.condition.contains(input_tokens, output_tokens))
            .map(|band| &band.price)
            .unwrap_or(self)
    }

    /// Amount owed for a usage record
    pub fn cost(&self, usage: &Usage) -> f64 {
        self.select(usage.input_tokens, usage.output_tokens).flat_cost(usage)
    }

    fn flat_cost(&self, usage: &Usage) -> f64 {
        let unit = if self.per_unit == 0 { DEFAULT_PRICE_UNIT } else { self.per_unit } as f64;

        // Sub-counters with their own price are carved out of the input count.
        let mut input = usage.input_tokens;
        let mut amount = 0.0;
        for (tokens, price) in [
            (usage.cached_tokens, self.cached_price),
            (usage.cache_creation_tokens, self.cache_creation_price),
            (usage.image_input_tokens, self.image_input_price),
            (usage.audio_input_tokens, self.audio_input_price),
        ] {
            if price > 0.0 && tokens > 0 {
                input = input.saturating_sub(tokens);
                amount += tokens as f64 * price / unit;
            }
        }

        amount += input as f64 * self.input_price / unit;
        amount += usage.output_tokens as f64 * self.output_price / unit;
        amount += usage.web_search_count as f64 * self.web_search_price;
        amount + self.per_request_price
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiered() -> Price {
        Price {
            input_price: 1.0,
            output_price: 2.0,
            conditional_prices: vec![
                ConditionalPrice {
                    condition: PriceCondition {
                        input_token_max: 32_000,
                        ..Default::default()
                    },
                    price: Price {
                        input_price: 0.5,
                        output_price: 1.0,
                        ..Default::default()
                    },
                },
                ConditionalPrice {
                    condition: PriceCondition {
                        input_token_min: 32_001,
                        input_token_max: 128_000,
                        ..Default::default()
                    },
                    price: Price {
                        input_price: 0.8,
                        output_price: 1.6,
                        ..Default::default()
                    },
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_select_matching_band() {
        let price = tiered();
        assert_eq!(price.select(1_000, 10).input_price, 0.5);
        assert_eq!(price.select(50_000, 10).input_price, 0.8);
    }

    #[test]
    fn test_select_falls_back_to_base() {
        let price = tiered();
        assert_eq!(price.select(500_000, 10).input_price, 1.0);
    }

    #[test]
    fn test_select_first_match_wins_on_overlap() {
        let mut price = tiered();
        price.conditional_prices[1].condition.input_token_min = 0;
        assert_eq!(price.select(1_000, 0).input_price, 0.5);
    }

    #[test]
    fn test_cost_with_cached_tokens() {
        let price = Price {
            input_price: 2.0,
            output_price: 4.0,
            cached_price: 1.0,
            ..Default::default()
        };
        let usage = Usage {
            input_tokens: 2000,
            cached_tokens: 1000,
            output_tokens: 500,
            ..Default::default()
        };
        // 1000 uncached * 2 + 1000 cached * 1 + 500 * 4, per 1000
        assert!((price.cost(&usage) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_cost_without_cached_price_bills_as_input() {
        let price = Price {
            input_price: 2.0,
            ..Default::default()
        };
        let usage = Usage {
            input_tokens: 1000,
            cached_tokens: 600,
            ..Default::default()
        };
        assert!((price.cost(&usage) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_cost_web_search_and_per_request() {
        let price = Price {
            web_search_price: 0.01,
            per_request_price: 0.1,
            ..Default::default()
        };
        let usage = Usage {
            web_search_count: 3,
            ..Default::default()
        };
        assert!((price.cost(&usage) - 0.13).abs() < 1e-9);
    }
}

//! Usage accounting
//!
//! Token and unit counters extracted from upstream responses. Every counter is a
//! non-negative integer where "absent" and "zero" are the same value.

use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

fn is_zero(value: &u64) -> bool {
    *value == 0
}

/// Usage counters for one relayed call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub input_tokens: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub output_tokens: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub total_tokens: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub cached_tokens: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub cache_creation_tokens: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub reasoning_tokens: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub image_input_tokens: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub audio_input_tokens: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub web_search_count: u64,
}

impl Usage {
    /// Usage with only input/output set
    pub fn tokens(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            ..Default::default()
        }
    }

    /// True when no counter is set
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// True when any token counter is set (web search count excluded)
    pub fn has_tokens(&self) -> bool {
        self.input_tokens != 0 || self.output_tokens != 0 || self.total_tokens != 0
    }

    /// Derive the total from input + output when upstream did not supply one
    pub fn fill_total(&mut self) {
        if self.total_tokens == 0 {
            self.total_tokens = self.input_tokens.saturating_add(self.output_tokens);
        }
    }

    /// Every non-zero counter with its field name, in declaration order
    pub fn non_zero_fields(&self) -> Vec<(&'static str, u64)> {
        [
            ("input_tokens", self.input_tokens),
            ("output_tokens", self.output_tokens),
            ("total_tokens", self.total_tokens),
            ("cached_tokens", self.cached_tokens),
            ("cache_creation_tokens", self.cache_creation_tokens),
            ("reasoning_tokens", self.reasoning_tokens),
            ("image_input_tokens", self.image_input_tokens),
            ("audio_input_tokens", self.audio_input_tokens),
            ("web_search_count", self.web_search_count),
        ]
        .into_iter()
        .filter(|(_, value)| *value != 0)
        .collect()
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, other: Self) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
        self.cached_tokens = self.cached_tokens.saturating_add(other.cached_tokens);
        self.cache_creation_tokens = self
            .cache_creation_tokens
            .saturating_add(other.cache_creation_tokens);
        self.reasoning_tokens = self.reasoning_tokens.saturating_add(other.reasoning_tokens);
        self.image_input_tokens = self.image_input_tokens.saturating_add(other.image_input_tokens);
        self.audio_input_tokens = self.audio_input_tokens.saturating_add(other.audio_input_tokens);
        self.web_search_count = self.web_search_count.saturating_add(other.web_search_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_total_derives_sum() {
        let mut usage = Usage::tokens(12, 30);
        usage.fill_total();
        assert_eq!(usage.total_tokens, 42);
    }

    #[test]
    fn test_fill_total_keeps_upstream_total() {
        let mut usage = Usage {
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 20,
            ..Default::default()
        };
        usage.fill_total();
        assert_eq!(usage.total_tokens, 20);
    }

    #[test]
    fn test_counters_saturate() {
        let mut usage = Usage::tokens(u64::MAX, 10);
        usage.fill_total();
        assert_eq!(usage.total_tokens, u64::MAX);

        usage += Usage {
            web_search_count: 1,
            ..Usage::tokens(5, u64::MAX)
        };
        assert_eq!(usage.input_tokens, u64::MAX);
        assert_eq!(usage.output_tokens, u64::MAX);
        assert_eq!(usage.web_search_count, 1);
    }

    #[test]
    fn test_non_zero_fields_skips_zero() {
        let usage = Usage {
            input_tokens: 3,
            reasoning_tokens: 7,
            ..Default::default()
        };
        assert_eq!(
            usage.non_zero_fields(),
            vec![("input_tokens", 3), ("reasoning_tokens", 7)]
        );
        assert!(Usage::default().non_zero_fields().is_empty());
    }

    #[test]
    fn test_absent_and_zero_serialize_identically() {
        let parsed: Usage = serde_json::from_str(r#"{"input_tokens": 0}"#).unwrap();
        assert_eq!(parsed, Usage::default());
        assert_eq!(serde_json::to_string(&parsed).unwrap(), "{}");
    }
}

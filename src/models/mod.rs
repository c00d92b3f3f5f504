//! Data models module
//!
//! Canonical request/response structures, usage counters and pricing

pub mod anthropic;
pub mod openai;
pub mod price;
pub mod usage;

pub use price::{ConditionalPrice, Price, PriceCondition};
pub use usage::Usage;

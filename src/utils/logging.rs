//! Logging utilities
//!
//! Subscriber setup, log-safe truncation and the default usage sink

use crate::models::Price;
use crate::relay::{Meta, RelayOutcome};
use anyhow::Result;
use tracing::{info, warn};

/// Truncate to at most `max_len` bytes on a char boundary, noting the cut
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... ({} bytes truncated)", &s[..end], s.len() - end)
}

/// Initialize the global tracing subscriber
///
/// `format` is `json` for production, anything else is human readable.
pub fn init_logging(log_level: &str, format: &str) -> Result<()> {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.to_string());

    let subscriber: Box<dyn tracing::Subscriber + Send + Sync> = if format == "json" {
        Box::new(
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .finish(),
        )
    } else {
        Box::new(
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .finish(),
        )
    };

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set tracing subscriber: {}", e))?;

    info!("Logging system initialized");
    Ok(())
}

/// Receives the outcome of every finished relay call
pub trait UsageSink: Send + Sync {
    fn record(&self, meta: &Meta, outcome: &RelayOutcome, price: Option<&Price>);
}

/// Emits each finished call as one structured log event
#[derive(Debug, Default, Clone, Copy)]
pub struct LogUsageSink;

impl UsageSink for LogUsageSink {
    fn record(&self, meta: &Meta, outcome: &RelayOutcome, price: Option<&Price>) {
        let usage = &outcome.usage;
        let cost = price.map(|p| p.cost(usage)).unwrap_or_default();
        let usage_json = serde_json::to_string(usage).unwrap_or_default();

        match &outcome.error {
            None => info!(
                target: "airelay::usage",
                request_id = %meta.request_id,
                channel = meta.channel.id,
                channel_type = %meta.channel.channel_type,
                mode = %meta.mode(),
                model = %meta.origin_model,
                usage = %usage_json,
                cost,
                first_byte_at = ?outcome.detail.first_byte_at,
                "Usage recorded"
            ),
            Some(error) => warn!(
                target: "airelay::usage",
                request_id = %meta.request_id,
                channel = meta.channel.id,
                channel_type = %meta.channel.channel_type,
                mode = %meta.mode(),
                model = %meta.origin_model,
                usage = %usage_json,
                cost,
                status = error.status_code().as_u16(),
                code = %error.error_code(),
                state = %outcome.state,
                "Usage recorded for failed call"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_string_unchanged() {
        assert_eq!(truncate("hello", 10), "hello");
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let out = truncate("héllo wörld", 2);
        assert!(out.starts_with("h..."));
        assert!(out.contains("truncated"));
    }
}

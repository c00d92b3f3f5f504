//! Request diagnostics
//!
//! `RequestDetail` holds the captured request body, the bounded response capture
//! and first-byte timing for one call. It is handed back to the caller for
//! logging and never persisted here.

use super::mode::Mode;
use super::writer::WriterSummary;
use axum::http::{header, HeaderMap};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct RequestDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub response_truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_byte_at: Option<DateTime<Utc>>,
}

impl RequestDetail {
    /// Record the inbound body, bounded by `limit`
    pub fn capture_request(&mut self, body: &[u8], limit: usize) {
        let end = body.len().min(limit);
        self.request_body = Some(String::from_utf8_lossy(&body[..end]).into_owned());
    }

    /// Fold in what the response writer observed
    pub fn record_response(&mut self, summary: &WriterSummary) {
        if !summary.captured.is_empty() {
            self.response_body = Some(summary.captured.clone());
        }
        self.response_truncated = summary.truncated;
        self.first_byte_at = summary.first_byte_at;
    }
}

/// Whether the inbound body should be captured: upload modes and non-JSON bodies
/// are passed through unread.
pub fn should_capture_request(mode: Mode, headers: &HeaderMap) -> bool {
    if mode.is_upload() {
        return false;
    }
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.trim_start().starts_with("application/json"))
        .unwrap_or(false)
}

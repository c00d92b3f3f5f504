//! Error handling module
//!
//! Canonical relay error taxonomy. Every pipeline stage converts its local failure
//! into `RelayError` at its own boundary, so callers see one stable error shape no
//! matter which upstream failed.

use crate::models::openai::{ErrorBody, ErrorResponse};
use crate::models::Usage;
use crate::relay::Mode;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Classified transport failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// The call was canceled before completing
    Canceled,
    /// Deadline exceeded or response headers never arrived
    Timeout,
    /// Upstream closed the connection cleanly mid-exchange
    Eof,
    /// Upstream closed the connection in the middle of a frame
    UnexpectedEof,
    Other,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportKind::Canceled => "canceled",
            TransportKind::Timeout => "timeout",
            TransportKind::Eof => "eof",
            TransportKind::UnexpectedEof => "unexpected eof",
            TransportKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// Relay error types
#[derive(Error, Debug)]
pub enum RelayError {
    /// Inbound payload could not be translated for the upstream
    #[error("request conversion failed: {0}")]
    Conversion(String),

    /// Adaptor could not set up upstream headers
    #[error("request header setup failed: {0}")]
    Header(String),

    /// Adaptor does not implement the requested mode
    #[error("unsupported mode: {mode}")]
    UnsupportedMode { mode: Mode },

    /// Network failure talking to the upstream
    #[error("upstream transport error ({kind}): {message}")]
    Transport { kind: TransportKind, message: String },

    /// Upstream answered with a non-2xx status
    #[error("upstream error ({status}): {message}")]
    Upstream {
        status: StatusCode,
        error_type: Option<String>,
        code: Option<String>,
        message: String,
    },

    /// Upstream body did not match the expected schema
    #[error("response decode failed: {0}")]
    Decode(String),

    /// Caller sent something the gateway cannot route
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown endpoint, model or channel
    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Classify a transport error into the canonical taxonomy
    pub fn transport(err: impl StdError + 'static) -> Self {
        let kind = classify_transport(&err);
        RelayError::Transport {
            kind,
            message: err.to_string(),
        }
    }

    /// Upstream error with no decoded body
    pub fn upstream(status: StatusCode, message: impl Into<String>) -> Self {
        RelayError::Upstream {
            status,
            error_type: None,
            code: None,
            message: message.into(),
        }
    }

    /// HTTP status returned to the caller
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::Conversion(_)
            | RelayError::UnsupportedMode { .. }
            | RelayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            RelayError::NotFound(_) => StatusCode::NOT_FOUND,
            RelayError::Transport { kind, .. } => match kind {
                TransportKind::Canceled => StatusCode::BAD_REQUEST,
                TransportKind::Timeout => StatusCode::REQUEST_TIMEOUT,
                TransportKind::Eof => StatusCode::SERVICE_UNAVAILABLE,
                TransportKind::UnexpectedEof | TransportKind::Other => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            RelayError::Upstream { status, .. } => *status,
            RelayError::Header(_) | RelayError::Decode(_) | RelayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Error type string (OpenAI `type` field)
    pub fn error_type(&self) -> String {
        match self {
            RelayError::Upstream {
                error_type: Some(error_type),
                ..
            } if !error_type.is_empty() => error_type.clone(),
            RelayError::Upstream { .. } => "upstream_error".to_string(),
            RelayError::Conversion(_)
            | RelayError::UnsupportedMode { .. }
            | RelayError::InvalidRequest(_) => "invalid_request_error".to_string(),
            RelayError::NotFound(_) => "not_found_error".to_string(),
            RelayError::Transport { .. } => "upstream_error".to_string(),
            RelayError::Header(_) | RelayError::Decode(_) | RelayError::Internal(_) => {
                "api_error".to_string()
            }
        }
    }

    /// Machine-readable code
    pub fn error_code(&self) -> String {
        match self {
            RelayError::Conversion(_) => "convert_request_failed".to_string(),
            RelayError::Header(_) => "setup_request_header_failed".to_string(),
            RelayError::UnsupportedMode { .. } => "unsupported_mode".to_string(),
            RelayError::Transport { kind, .. } => match kind {
                TransportKind::Canceled => "request_canceled",
                TransportKind::Timeout => "request_timeout",
                TransportKind::Eof => "upstream_eof",
                TransportKind::UnexpectedEof => "upstream_unexpected_eof",
                TransportKind::Other => "do_request_failed",
            }
            .to_string(),
            RelayError::Upstream { code: Some(code), .. } if !code.is_empty() => code.clone(),
            RelayError::Upstream { .. } => "upstream_error".to_string(),
            RelayError::Decode(_) => "decode_response_failed".to_string(),
            RelayError::InvalidRequest(_) => "invalid_request".to_string(),
            RelayError::NotFound(_) => "not_found".to_string(),
            RelayError::Internal(_) => "internal_error".to_string(),
        }
    }

    /// Whether the failure originated at the upstream provider
    pub fn is_upstream(&self) -> bool {
        matches!(self, RelayError::Upstream { .. })
    }

    /// Message shown to the caller. Upstream messages pass through near-verbatim;
    /// local server-side failures stay generic.
    pub fn public_message(&self) -> String {
        match self {
            RelayError::Upstream { message, .. } => message.clone(),
            RelayError::Transport { kind, .. } => match kind {
                TransportKind::Canceled => "upstream request was canceled",
                TransportKind::Timeout => "upstream request timed out",
                TransportKind::Eof => "upstream closed the connection",
                TransportKind::UnexpectedEof | TransportKind::Other => "upstream request failed",
            }
            .to_string(),
            RelayError::Header(_) | RelayError::Decode(_) | RelayError::Internal(_) => {
                "internal server error".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Whether detailed error information should be logged at error level
    pub fn should_log_details(&self) -> bool {
        !matches!(
            self,
            RelayError::InvalidRequest(_) | RelayError::NotFound(_) | RelayError::Conversion(_)
        )
    }

    /// Convert to the canonical error body
    pub fn to_error_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: ErrorBody {
                message: self.public_message(),
                error_type: self.error_type(),
                param: None,
                code: Some(serde_json::Value::String(self.error_code())),
            },
        }
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        RelayError::transport(err)
    }
}

/// Walk an error's source chain and classify the first recognizable cause
pub fn classify_transport(err: &(dyn StdError + 'static)) -> TransportKind {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(reqwest_err) = e.downcast_ref::<reqwest::Error>() {
            if reqwest_err.is_timeout() {
                return TransportKind::Timeout;
            }
        }
        if let Some(hyper_err) = e.downcast_ref::<hyper::Error>() {
            if hyper_err.is_canceled() {
                return TransportKind::Canceled;
            }
            if hyper_err.is_timeout() {
                return TransportKind::Timeout;
            }
            if hyper_err.is_incomplete_message() {
                return TransportKind::Eof;
            }
        }
        if e.is::<tokio::time::error::Elapsed>() {
            return TransportKind::Timeout;
        }
        if let Some(io_err) = e.downcast_ref::<std::io::Error>() {
            match io_err.kind() {
                std::io::ErrorKind::Interrupted => return TransportKind::Canceled,
                std::io::ErrorKind::TimedOut => return TransportKind::Timeout,
                std::io::ErrorKind::UnexpectedEof => return TransportKind::UnexpectedEof,
                std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe => return TransportKind::Eof,
                _ => {}
            }
        }
        if e.to_string().contains("timeout awaiting response headers") {
            return TransportKind::Timeout;
        }
        current = e.source();
    }
    TransportKind::Other
}

/// Failure returned by response normalization. Carries the usage already
/// extracted from bytes forwarded to the caller before the failure.
#[derive(Debug)]
pub struct ResponseError {
    pub error: RelayError,
    pub usage: Usage,
}

impl ResponseError {
    pub fn with_usage(error: RelayError, usage: Usage) -> Self {
        Self { error, usage }
    }
}

impl From<RelayError> for ResponseError {
    fn from(error: RelayError) -> Self {
        Self {
            error,
            usage: Usage::default(),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if self.should_log_details() {
            tracing::error!("Relay error: {} - Status code: {}", self, status);
        } else {
            tracing::warn!("Client error: {} - Status code: {}", self.error_code(), status);
        }

        (status, Json(self.to_error_response())).into_response()
    }
}

/// Result type alias
pub type RelayResult<T> = Result<T, RelayError>;

/// Boundary conversion helpers
pub trait ErrorContext<T> {
    fn conversion_context(self, message: &str) -> RelayResult<T>;

    fn decode_context(self, message: &str) -> RelayResult<T>;

    fn header_context(self, message: &str) -> RelayResult<T>;

    fn internal_context(self, message: &str) -> RelayResult<T>;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    E: StdError + Send + Sync + 'static,
{
    fn conversion_context(self, message: &str) -> RelayResult<T> {
        self.map_err(|e| RelayError::Conversion(format!("{}: {}", message, e)))
    }

    fn decode_context(self, message: &str) -> RelayResult<T> {
        self.map_err(|e| RelayError::Decode(format!("{}: {}", message, e)))
    }

    fn header_context(self, message: &str) -> RelayResult<T> {
        self.map_err(|e| RelayError::Header(format!("{}: {}", message, e)))
    }

    fn internal_context(self, message: &str) -> RelayResult<T> {
        self.map_err(|e| RelayError::Internal(format!("{}: {}", message, e)))
    }
}

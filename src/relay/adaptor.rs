//! Adaptor contract
//!
//! Every upstream provider integration implements `Adaptor`. Most providers speak a
//! close variant of the OpenAI wire format and compose the shared OpenAI adaptor,
//! overriding only what differs.

use super::meta::{Channel, Meta};
use super::mode::Mode;
use super::writer::ResponseWriter;
use crate::models::Usage;
use crate::utils::error::{ErrorContext, RelayError, RelayResult, ResponseError};
use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use tokio_stream::wrappers::ReceiverStream;

/// Unread remainder of a streamed upload body
pub type BodyRemainder = ReceiverStream<Result<Bytes, std::io::Error>>;

/// Raw inbound request primitives
#[derive(Debug)]
pub struct InboundRequest {
    pub method: Method,
    pub headers: HeaderMap,
    /// Buffered body. For a streamed upload only the leading bytes.
    pub body: Bytes,
    remainder: Option<BodyRemainder>,
}

impl InboundRequest {
    pub fn new(method: Method, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            headers,
            body,
            remainder: None,
        }
    }

    /// Upload whose body continues past `body` in `remainder`
    pub fn streamed(method: Method, headers: HeaderMap, head: Bytes, remainder: BodyRemainder) -> Self {
        Self {
            remainder: Some(remainder),
            ..Self::new(method, headers, head)
        }
    }

    /// Whether part of the body is still unread
    pub fn is_streamed(&self) -> bool {
        self.remainder.is_some()
    }

    /// Hand the unread remainder over, at most once
    pub fn take_remainder(&mut self) -> Option<BodyRemainder> {
        self.remainder.take()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    pub fn is_json(&self) -> bool {
        self.content_type()
            .is_some_and(|ct| ct.starts_with("application/json"))
    }

    /// Parse the body as JSON
    pub fn json(&self) -> RelayResult<Value> {
        serde_json::from_slice(&self.body).conversion_context("Invalid JSON request body")
    }
}

/// Upstream endpoint for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestUrl {
    pub method: Method,
    pub url: String,
}

impl RequestUrl {
    pub fn post(url: impl Into<String>) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
        }
    }
}

/// Converted upstream body and headers, consumed once by the orchestrator
#[derive(Debug, Default)]
pub struct ConvertResult {
    pub headers: HeaderMap,
    pub body: Bytes,
    /// `body` is the inbound body as received; any unread remainder follows it
    pub forwards_inbound: bool,
}

impl ConvertResult {
    /// JSON body with a matching content type
    pub fn json<T: Serialize>(value: &T) -> RelayResult<Self> {
        let body = serde_json::to_vec(value).conversion_context("Failed to encode request body")?;
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(Self {
            headers,
            body: Bytes::from(body),
            forwards_inbound: false,
        })
    }

    /// Forward the inbound body unchanged, keeping its content type
    pub fn passthrough(request: &InboundRequest) -> Self {
        let mut headers = HeaderMap::new();
        if let Some(content_type) = request.headers.get(header::CONTENT_TYPE) {
            headers.insert(header::CONTENT_TYPE, content_type.clone());
        }
        Self {
            headers,
            body: request.body.clone(),
            forwards_inbound: true,
        }
    }

    /// Request without a body
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Static, advisory description of an adaptor
#[derive(Debug, Clone, Serialize)]
pub struct AdaptorMetadata {
    pub name: &'static str,
    pub default_base_url: &'static str,
    pub modes: Vec<Mode>,
    pub models: &'static [&'static str],
    pub key_help: &'static str,
    pub features: &'static [&'static str],
}

/// Decodes a provider-specific error body into the canonical error
pub type ErrorDecoder = fn(StatusCode, &[u8]) -> RelayError;

/// Optional key format check
pub trait KeyValidator: Send + Sync {
    fn validate_key(&self, key: &str) -> RelayResult<()>;
}

/// Optional account balance lookup
#[async_trait]
pub trait BalanceFetcher: Send + Sync {
    async fn balance(&self, client: &reqwest::Client, channel: &Channel) -> RelayResult<f64>;
}

/// Provider integration contract
#[async_trait]
pub trait Adaptor: Send + Sync {
    /// Adaptor name
    fn name(&self) -> &'static str;

    /// Base URL used when the channel does not configure one
    fn default_base_url(&self) -> &'static str;

    /// Modes this adaptor implements
    fn supported_modes(&self) -> &'static [Mode];

    fn supports(&self, mode: Mode) -> bool {
        self.supported_modes().contains(&mode)
    }

    /// Resolve the upstream endpoint. Unsupported modes yield
    /// `RelayError::UnsupportedMode`.
    fn request_url(&self, meta: &Meta) -> RelayResult<RequestUrl>;

    /// Translate the inbound payload. Any transient change to `meta.actual_model`
    /// must be undone before returning.
    fn convert_request(&self, meta: &mut Meta, request: &InboundRequest) -> RelayResult<ConvertResult>;

    /// Inject auth and provider headers over the converted ones
    fn setup_request_header(&self, meta: &Meta, headers: &mut HeaderMap) -> RelayResult<()>;

    /// Perform the upstream call
    async fn do_request(
        &self,
        client: &reqwest::Client,
        _meta: &Meta,
        request: reqwest::Request,
    ) -> RelayResult<reqwest::Response> {
        client.execute(request).await.map_err(RelayError::transport)
    }

    /// Normalize the upstream reply into the writer and extract usage
    async fn do_response(
        &self,
        meta: &Meta,
        response: reqwest::Response,
        writer: &mut ResponseWriter,
    ) -> Result<Usage, ResponseError>;

    fn metadata(&self) -> AdaptorMetadata;

    fn key_validator(&self) -> Option<&dyn KeyValidator> {
        None
    }

    fn balance_fetcher(&self) -> Option<&dyn BalanceFetcher> {
        None
    }
}

/// Set a header from a string, mapping invalid values to a header error
pub fn insert_header(
    headers: &mut HeaderMap,
    name: &'static str,
    value: &str,
) -> RelayResult<()> {
    let value = HeaderValue::from_str(value).header_context(name)?;
    headers.insert(name, value);
    Ok(())
}

/// Read a non-2xx upstream reply and decode it with `decoder`
pub async fn read_upstream_error(response: reqwest::Response, decoder: ErrorDecoder) -> RelayError {
    let status = response.status();
    match response.bytes().await {
        Ok(body) => decoder(status, &body),
        Err(e) => RelayError::transport(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_json() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let request = InboundRequest::new(
            Method::POST,
            headers,
            Bytes::from_static(br#"{"model":"gpt-4"}"#),
        );
        assert!(request.is_json());
        assert_eq!(request.json().unwrap()["model"], "gpt-4");
    }

    #[test]
    fn test_invalid_json_is_conversion_error() {
        let request = InboundRequest::new(Method::POST, HeaderMap::new(), Bytes::from_static(b"{"));
        assert!(matches!(request.json(), Err(RelayError::Conversion(_))));
    }

    #[tokio::test]
    async fn test_streamed_remainder_taken_once() {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        drop(tx);
        let mut request = InboundRequest::streamed(
            Method::POST,
            HeaderMap::new(),
            Bytes::from_static(b"--b\r\n"),
            ReceiverStream::new(rx),
        );
        assert!(request.is_streamed());

        let converted = ConvertResult::passthrough(&request);
        assert!(converted.forwards_inbound);
        assert_eq!(converted.body, Bytes::from_static(b"--b\r\n"));

        assert!(request.take_remainder().is_some());
        assert!(request.take_remainder().is_none());
        assert!(!request.is_streamed());
    }

    #[test]
    fn test_insert_header_rejects_invalid_value() {
        let mut headers = HeaderMap::new();
        assert!(insert_header(&mut headers, "x-api-key", "ok").is_ok());
        assert!(matches!(
            insert_header(&mut headers, "x-api-key", "bad\nvalue"),
            Err(RelayError::Header(_))
        ));
    }
}

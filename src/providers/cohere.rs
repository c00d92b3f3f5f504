//! Cohere adaptor
//!
//! Rerank uses the native v2 API; chat completions go through Cohere's
//! OpenAI-compatible surface.

use super::openai::{decode_openai_error, OpenAIAdaptor};
use crate::models::Usage;
use crate::relay::adaptor::{
    read_upstream_error, Adaptor, AdaptorMetadata, ConvertResult, InboundRequest, RequestUrl,
};
use crate::relay::stream::ResponseHooks;
use crate::relay::{Meta, Mode, ResponseWriter};
use crate::utils::error::{ErrorContext, RelayError, RelayResult, ResponseError};
use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use serde::Deserialize;

pub const DEFAULT_BASE_URL: &str = "https://api.cohere.ai";

const MODES: &[Mode] = &[Mode::ChatCompletions, Mode::Rerank];

const MODELS: &[&str] = &["command-a-03-2025", "command-r-plus", "rerank-v3.5"];

#[derive(Debug, Default, Deserialize)]
struct RerankResponse {
    #[serde(default)]
    meta: RerankMeta,
}

#[derive(Debug, Default, Deserialize)]
struct RerankMeta {
    #[serde(default)]
    billed_units: BilledUnits,
    #[serde(default)]
    tokens: Option<RerankTokens>,
}

#[derive(Debug, Default, Deserialize)]
struct BilledUnits {
    #[serde(default)]
    search_units: u64,
}

#[derive(Debug, Default, Deserialize)]
struct RerankTokens {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct CohereError {
    message: String,
}

/// Cohere errors are `{"message": ...}`; OpenAI-compatible routes use the OpenAI shape
pub fn decode_cohere_error(status: StatusCode, body: &[u8]) -> RelayError {
    match serde_json::from_slice::<CohereError>(body) {
        Ok(error) => RelayError::upstream(status, error.message),
        Err(_) => decode_openai_error(status, body),
    }
}

/// Cohere adaptor
#[derive(Debug, Clone, Copy, Default)]
pub struct CohereAdaptor {
    base: OpenAIAdaptor,
}

impl CohereAdaptor {
    pub fn new() -> Self {
        Self::default()
    }

    fn rerank_usage(meta: &Meta, response: &RerankResponse) -> Usage {
        match &response.meta.tokens {
            Some(tokens) if tokens.input_tokens > 0 => {
                Usage::tokens(tokens.input_tokens, tokens.output_tokens)
            }
            // Billing is by search unit; fall back to the local count
            _ => Usage::tokens(meta.input_tokens.max(response.meta.billed_units.search_units), 0),
        }
    }
}

#[async_trait]
impl Adaptor for CohereAdaptor {
    fn name(&self) -> &'static str {
        "cohere"
    }

    fn default_base_url(&self) -> &'static str {
        DEFAULT_BASE_URL
    }

    fn supported_modes(&self) -> &'static [Mode] {
        MODES
    }

    fn request_url(&self, meta: &Meta) -> RelayResult<RequestUrl> {
        match meta.mode() {
            Mode::Rerank => Ok(RequestUrl::post(format!("{}/v2/rerank", meta.base_url()))),
            Mode::ChatCompletions => Ok(RequestUrl::post(format!(
                "{}/compatibility/v1/chat/completions",
                meta.base_url()
            ))),
            mode => Err(RelayError::UnsupportedMode { mode }),
        }
    }

    fn convert_request(&self, meta: &mut Meta, request: &InboundRequest) -> RelayResult<ConvertResult> {
        self.base.convert_request(meta, request)
    }

    fn setup_request_header(&self, meta: &Meta, headers: &mut HeaderMap) -> RelayResult<()> {
        self.base.bearer_auth(meta, headers)
    }

    async fn do_response(
        &self,
        meta: &Meta,
        response: reqwest::Response,
        writer: &mut ResponseWriter,
    ) -> Result<Usage, ResponseError> {
        if meta.mode() != Mode::Rerank {
            return self
                .base
                .handle_response(
                    meta,
                    response,
                    writer,
                    ResponseHooks::default(),
                    decode_cohere_error,
                )
                .await;
        }

        if !response.status().is_success() {
            return Err(read_upstream_error(response, decode_cohere_error).await.into());
        }
        let status = response.status();
        let body = response.bytes().await.map_err(RelayError::transport)?;
        let rerank: RerankResponse =
            serde_json::from_slice(&body).decode_context("Failed to decode rerank response")?;
        writer.set_content_type("application/json");
        writer.write_header(status);
        writer.write(body).await;
        Ok(Self::rerank_usage(meta, &rerank))
    }

    fn metadata(&self) -> AdaptorMetadata {
        AdaptorMetadata {
            name: self.name(),
            default_base_url: DEFAULT_BASE_URL,
            modes: MODES.to_vec(),
            models: MODELS,
            key_help: "Cohere API key",
            features: &["native rerank", "OpenAI-compatible chat"],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::{Channel, ChannelType};

    fn meta(mode: Mode) -> Meta {
        let channel = Channel::new(4, ChannelType::Cohere, "co-key").with_base_url(DEFAULT_BASE_URL);
        Meta::new(mode, channel, "rerank-v3.5", "rerank-v3.5")
    }

    #[test]
    fn test_urls() {
        let adaptor = CohereAdaptor::new();
        assert_eq!(
            adaptor.request_url(&meta(Mode::Rerank)).unwrap().url,
            "https://api.cohere.ai/v2/rerank"
        );
        assert_eq!(
            adaptor.request_url(&meta(Mode::ChatCompletions)).unwrap().url,
            "https://api.cohere.ai/compatibility/v1/chat/completions"
        );
        assert!(adaptor.request_url(&meta(Mode::Embeddings)).is_err());
    }

    #[test]
    fn test_rerank_usage_prefers_reported_tokens() {
        let response: RerankResponse = serde_json::from_str(
            r#"{"results":[],"meta":{"billed_units":{"search_units":1},"tokens":{"input_tokens":42}}}"#,
        )
        .unwrap();
        let usage = CohereAdaptor::rerank_usage(&meta(Mode::Rerank).with_input_tokens(7), &response);
        assert_eq!(usage.input_tokens, 42);
    }

    #[test]
    fn test_decode_cohere_error() {
        let err = decode_cohere_error(StatusCode::BAD_REQUEST, br#"{"message":"invalid model"}"#);
        assert_eq!(err.public_message(), "invalid model");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}

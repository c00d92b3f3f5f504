//! OpenAI adaptor
//!
//! The shared base for every OpenAI-shaped upstream. Other adaptors hold one by value
//! and reuse its URL, conversion and response handling.

use crate::models::openai::ErrorResponse;
use crate::models::Usage;
use crate::relay::adaptor::{
    insert_header, read_upstream_error, Adaptor, AdaptorMetadata, ConvertResult, ErrorDecoder,
    InboundRequest, RequestUrl,
};
use crate::relay::node::{self, NodeTransform};
use crate::relay::stream::{
    is_event_stream, openai_json_handler, openai_stream_handler, passthrough_handler,
    ResponseHooks,
};
use crate::relay::{Meta, Mode, ResponseWriter};
use crate::utils::error::{RelayError, RelayResult, ResponseError};
use async_trait::async_trait;
use axum::http::{header, HeaderMap, StatusCode};
use serde_json::Value;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const MODES: &[Mode] = &[
    Mode::ChatCompletions,
    Mode::Completions,
    Mode::Embeddings,
    Mode::Moderations,
    Mode::ImagesGenerations,
    Mode::ImagesEdits,
    Mode::AudioSpeech,
    Mode::AudioTranscription,
    Mode::AudioTranslation,
];

const MODELS: &[&str] = &[
    "gpt-4o",
    "gpt-4o-mini",
    "gpt-4.1",
    "o3-mini",
    "text-embedding-3-small",
    "text-embedding-3-large",
    "omni-moderation-latest",
    "dall-e-3",
    "tts-1",
    "whisper-1",
];

/// Transforms applied to OpenAI chat requests before sending
const REQUEST_TRANSFORMS: &[NodeTransform] = &[node::ensure_stream_usage];

/// OpenAI-compatible path for a mode, relative to a `/v1`-style base URL
pub fn path_for(mode: Mode) -> Option<&'static str> {
    let path = match mode {
        Mode::ChatCompletions => "/chat/completions",
        Mode::Completions => "/completions",
        Mode::Embeddings => "/embeddings",
        Mode::Moderations => "/moderations",
        Mode::ImagesGenerations => "/images/generations",
        Mode::ImagesEdits => "/images/edits",
        Mode::AudioSpeech => "/audio/speech",
        Mode::AudioTranscription => "/audio/transcriptions",
        Mode::AudioTranslation => "/audio/translations",
        Mode::Rerank => "/rerank",
        _ => return None,
    };
    Some(path)
}

/// Decode an OpenAI-shaped error body, falling back to the raw text
pub fn decode_openai_error(status: StatusCode, body: &[u8]) -> RelayError {
    match serde_json::from_slice::<ErrorResponse>(body) {
        Ok(error) => RelayError::Upstream {
            status,
            error_type: Some(error.error.error_type).filter(|t| !t.is_empty()),
            code: error.error.code.and_then(|code| match code {
                Value::String(code) => Some(code),
                Value::Null => None,
                other => Some(other.to_string()),
            }),
            message: error.error.message,
        },
        Err(_) => {
            let text = String::from_utf8_lossy(body);
            let message = if text.trim().is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("upstream error")
                    .to_string()
            } else {
                crate::utils::logging::truncate(text.trim(), 1024)
            };
            RelayError::upstream(status, message)
        }
    }
}

/// OpenAI adaptor
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAIAdaptor;

impl OpenAIAdaptor {
    pub fn new() -> Self {
        Self
    }

    /// Resolve `base_url + path` for `modes`, or an unsupported mode error
    pub fn request_url_for(&self, base_url: &str, mode: Mode, modes: &[Mode]) -> RelayResult<RequestUrl> {
        if !modes.contains(&mode) {
            return Err(RelayError::UnsupportedMode { mode });
        }
        let path = path_for(mode).ok_or(RelayError::UnsupportedMode { mode })?;
        Ok(RequestUrl::post(format!("{}{}", base_url.trim_end_matches('/'), path)))
    }

    /// Rewrite the model name and run request transforms. Uploads and non-JSON
    /// bodies are forwarded as-is.
    pub fn convert_with(
        &self,
        meta: &Meta,
        request: &InboundRequest,
        transforms: &[NodeTransform],
    ) -> RelayResult<ConvertResult> {
        if meta.mode().is_upload() || !request.is_json() {
            return Ok(ConvertResult::passthrough(request));
        }

        let mut body = request.json()?;
        if !body.is_object() {
            return Err(RelayError::Conversion("request body must be a JSON object".to_string()));
        }
        if !meta.actual_model.is_empty() {
            node::set(&mut body, "model", Value::String(meta.actual_model.clone()));
        }
        node::apply(&mut body, transforms);
        ConvertResult::json(&body)
    }

    /// `Authorization: Bearer <key>`
    pub fn bearer_auth(&self, meta: &Meta, headers: &mut HeaderMap) -> RelayResult<()> {
        insert_header(headers, "authorization", &format!("Bearer {}", meta.channel.key))
    }

    /// Normalize an OpenAI-shaped reply
    pub async fn handle_response(
        &self,
        meta: &Meta,
        response: reqwest::Response,
        writer: &mut ResponseWriter,
        hooks: ResponseHooks,
        decoder: ErrorDecoder,
    ) -> Result<Usage, ResponseError> {
        if !response.status().is_success() {
            return Err(read_upstream_error(response, decoder).await.into());
        }

        match meta.mode() {
            Mode::AudioSpeech => {
                passthrough_handler(response, writer).await?;
                Ok(Usage::tokens(meta.input_tokens, 0))
            }
            Mode::AudioTranscription | Mode::AudioTranslation if !is_json(&response) => {
                debug!("Forwarding non-JSON transcription output");
                passthrough_handler(response, writer).await?;
                Ok(Usage::default())
            }
            _ if is_event_stream(&response) => {
                openai_stream_handler(meta, response, writer, hooks).await
            }
            _ => openai_json_handler(meta, response, writer, hooks).await,
        }
    }
}

fn is_json(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"))
}

#[async_trait]
impl Adaptor for OpenAIAdaptor {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn default_base_url(&self) -> &'static str {
        DEFAULT_BASE_URL
    }

    fn supported_modes(&self) -> &'static [Mode] {
        MODES
    }

    fn request_url(&self, meta: &Meta) -> RelayResult<RequestUrl> {
        self.request_url_for(meta.base_url(), meta.mode(), MODES)
    }

    fn convert_request(&self, meta: &mut Meta, request: &InboundRequest) -> RelayResult<ConvertResult> {
        let transforms: &[NodeTransform] = match meta.mode() {
            Mode::ChatCompletions | Mode::Completions => REQUEST_TRANSFORMS,
            _ => &[],
        };
        self.convert_with(meta, request, transforms)
    }

    fn setup_request_header(&self, meta: &Meta, headers: &mut HeaderMap) -> RelayResult<()> {
        self.bearer_auth(meta, headers)
    }

    async fn do_response(
        &self,
        meta: &Meta,
        response: reqwest::Response,
        writer: &mut ResponseWriter,
    ) -> Result<Usage, ResponseError> {
        self.handle_response(meta, response, writer, ResponseHooks::default(), decode_openai_error)
            .await
    }

    fn metadata(&self) -> AdaptorMetadata {
        AdaptorMetadata {
            name: self.name(),
            default_base_url: DEFAULT_BASE_URL,
            modes: MODES.to_vec(),
            models: MODELS,
            key_help: "sk-...",
            features: &["stream usage via stream_options.include_usage"],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::{Channel, ChannelType};
    use axum::http::{HeaderValue, Method};
    use bytes::Bytes;

    fn meta(mode: Mode) -> Meta {
        let channel = Channel::new(1, ChannelType::OpenAI, "sk-test").with_base_url(DEFAULT_BASE_URL);
        Meta::new(mode, channel, "gpt-4", "gpt-4-0613")
    }

    fn json_request(body: &'static str) -> InboundRequest {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        InboundRequest::new(Method::POST, headers, Bytes::from_static(body.as_bytes()))
    }

    #[test]
    fn test_request_url() {
        let url = OpenAIAdaptor.request_url(&meta(Mode::ChatCompletions)).unwrap();
        assert_eq!(url.method, Method::POST);
        assert_eq!(url.url, "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn test_rerank_unsupported() {
        match OpenAIAdaptor.request_url(&meta(Mode::Rerank)) {
            Err(RelayError::UnsupportedMode { mode }) => assert_eq!(mode, Mode::Rerank),
            other => panic!("Expected unsupported mode, got {:?}", other),
        }
    }

    #[test]
    fn test_convert_rewrites_model_and_requests_usage() {
        let mut meta = meta(Mode::ChatCompletions);
        let request = json_request(r#"{"model":"gpt-4","stream":true,"messages":[]}"#);
        let converted = OpenAIAdaptor.convert_request(&mut meta, &request).unwrap();
        let body: Value = serde_json::from_slice(&converted.body).unwrap();
        assert_eq!(body["model"], "gpt-4-0613");
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert_eq!(converted.headers[header::CONTENT_TYPE], "application/json");
    }

    #[test]
    fn test_upload_passthrough() {
        let mut meta = meta(Mode::AudioTranscription);
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("multipart/form-data; boundary=xyz"),
        );
        let request = InboundRequest::new(Method::POST, headers, Bytes::from_static(b"--xyz--"));
        let converted = OpenAIAdaptor.convert_request(&mut meta, &request).unwrap();
        assert_eq!(&converted.body[..], b"--xyz--");
        assert_eq!(
            converted.headers[header::CONTENT_TYPE],
            "multipart/form-data; boundary=xyz"
        );
    }

    #[test]
    fn test_bearer_header() {
        let mut headers = HeaderMap::new();
        OpenAIAdaptor
            .setup_request_header(&meta(Mode::Embeddings), &mut headers)
            .unwrap();
        assert_eq!(headers[header::AUTHORIZATION], "Bearer sk-test");
    }

    #[test]
    fn test_decode_openai_error() {
        let err = decode_openai_error(
            StatusCode::UNAUTHORIZED,
            br#"{"error":{"message":"Incorrect API key","type":"invalid_request_error","code":"invalid_api_key"}}"#,
        );
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.error_code(), "invalid_api_key");
        assert_eq!(err.public_message(), "Incorrect API key");
    }

    #[test]
    fn test_decode_plain_text_error() {
        let err = decode_openai_error(StatusCode::BAD_GATEWAY, b"");
        assert_eq!(err.public_message(), "Bad Gateway");
    }
}

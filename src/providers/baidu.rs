//! Baidu Qianfan (v2) adaptor
//!
//! OpenAI-shaped API with bearer `bce-v3` keys and an optional `appid` header taken
//! from the channel config. Qianfan model ids are lowercase.

use super::openai::{decode_openai_error, OpenAIAdaptor};
use crate::models::Usage;
use crate::relay::adaptor::{
    insert_header, Adaptor, AdaptorMetadata, ConvertResult, InboundRequest, KeyValidator,
    RequestUrl,
};
use crate::relay::stream::ResponseHooks;
use crate::relay::{Meta, Mode, ResponseWriter};
use crate::utils::error::{RelayError, RelayResult, ResponseError};
use async_trait::async_trait;
use axum::http::HeaderMap;

pub const DEFAULT_BASE_URL: &str = "https://qianfan.baidubce.com/v2";

const MODES: &[Mode] = &[
    Mode::ChatCompletions,
    Mode::Embeddings,
    Mode::ImagesGenerations,
    Mode::Rerank,
];

const MODELS: &[&str] = &["ernie-4.5-turbo-128k", "ernie-x1-turbo-32k", "embedding-v1", "bce-reranker-base"];

/// Channel config key holding the Qianfan application id
pub const APP_ID_CONFIG_KEY: &str = "app_id";

/// Checks `bce-v3/<access key>/<secret>` keys
#[derive(Debug, Default)]
pub struct BaiduKeyValidator;

impl KeyValidator for BaiduKeyValidator {
    fn validate_key(&self, key: &str) -> RelayResult<()> {
        let mut parts = key.split('/');
        let valid = parts.next() == Some("bce-v3")
            && parts.next().is_some_and(|p| !p.is_empty())
            && parts.next().is_some_and(|p| !p.is_empty())
            && parts.next().is_none();
        if valid {
            Ok(())
        } else {
            Err(RelayError::InvalidRequest(
                "Qianfan keys have the form bce-v3/<access key>/<secret>".to_string(),
            ))
        }
    }
}

/// Baidu Qianfan adaptor
#[derive(Debug, Default)]
pub struct BaiduAdaptor {
    base: OpenAIAdaptor,
    validator: BaiduKeyValidator,
}

impl BaiduAdaptor {
    pub fn new() -> Self {
        Self::default()
    }

    fn path(mode: Mode) -> Option<&'static str> {
        match mode {
            Mode::Rerank => Some("/rerankers"),
            mode => super::openai::path_for(mode),
        }
    }
}

#[async_trait]
impl Adaptor for BaiduAdaptor {
    fn name(&self) -> &'static str {
        "baidu"
    }

    fn default_base_url(&self) -> &'static str {
        DEFAULT_BASE_URL
    }

    fn supported_modes(&self) -> &'static [Mode] {
        MODES
    }

    fn request_url(&self, meta: &Meta) -> RelayResult<RequestUrl> {
        let mode = meta.mode();
        if !MODES.contains(&mode) {
            return Err(RelayError::UnsupportedMode { mode });
        }
        let path = Self::path(mode).ok_or(RelayError::UnsupportedMode { mode })?;
        Ok(RequestUrl::post(format!("{}{}", meta.base_url(), path)))
    }

    fn convert_request(&self, meta: &mut Meta, request: &InboundRequest) -> RelayResult<ConvertResult> {
        // The lowercase id only goes on the wire; the configured name is kept.
        let configured = std::mem::take(&mut meta.actual_model);
        meta.actual_model = configured.to_lowercase();
        let converted = self.base.convert_request(meta, request);
        meta.actual_model = configured;
        converted
    }

    fn setup_request_header(&self, meta: &Meta, headers: &mut HeaderMap) -> RelayResult<()> {
        self.base.bearer_auth(meta, headers)?;
        if let Some(app_id) = meta.channel.config_str(APP_ID_CONFIG_KEY) {
            insert_header(headers, "appid", app_id)?;
        }
        Ok(())
    }

    async fn do_response(
        &self,
        meta: &Meta,
        response: reqwest::Response,
        writer: &mut ResponseWriter,
    ) -> Result<Usage, ResponseError> {
        self.base
            .handle_response(meta, response, writer, ResponseHooks::default(), decode_openai_error)
            .await
    }

    fn metadata(&self) -> AdaptorMetadata {
        AdaptorMetadata {
            name: self.name(),
            default_base_url: DEFAULT_BASE_URL,
            modes: MODES.to_vec(),
            models: MODELS,
            key_help: "bce-v3/<access key>/<secret>; set config.app_id to send the appid header",
            features: &["key validation"],
        }
    }

    fn key_validator(&self) -> Option<&dyn KeyValidator> {
        Some(&self.validator)
    }
}

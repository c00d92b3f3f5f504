//! Azure OpenAI adaptor
//!
//! Deployment-style URLs with an `api-version` query parameter and `api-key` auth.
//! The channel key may carry the API version: `token|api-version`.

use super::openai::{decode_openai_error, OpenAIAdaptor};
use crate::models::Usage;
use crate::relay::adaptor::{
    insert_header, read_upstream_error, Adaptor, AdaptorMetadata, ConvertResult, InboundRequest,
    RequestUrl,
};
use crate::relay::node::{self, NodeTransform};
use crate::relay::stream::{passthrough_handler, ResponseHooks};
use crate::relay::{Meta, Mode, ResponseWriter};
use crate::utils::error::{RelayError, RelayResult, ResponseError};
use async_trait::async_trait;
use axum::http::HeaderMap;

/// API version used when the key does not specify one
pub const DEFAULT_API_VERSION: &str = "2025-04-01-preview";

/// API version of the v1 video generation endpoints
const VIDEO_API_VERSION: &str = "preview";

const MODES: &[Mode] = &[
    Mode::ChatCompletions,
    Mode::Completions,
    Mode::Embeddings,
    Mode::ImagesGenerations,
    Mode::ImagesEdits,
    Mode::AudioSpeech,
    Mode::AudioTranscription,
    Mode::AudioTranslation,
    Mode::VideoGenerationsJobs,
    Mode::VideoGenerationsGetJobs,
    Mode::VideoGenerationsContent,
];

const REQUEST_TRANSFORMS: &[NodeTransform] = &[node::ensure_stream_usage];

/// Split a channel key into token and API version
pub fn parse_key(key: &str) -> (&str, &str) {
    match key.split_once('|') {
        Some((token, version)) if !version.trim().is_empty() => (token.trim(), version.trim()),
        Some((token, _)) => (token.trim(), DEFAULT_API_VERSION),
        None => (key.trim(), DEFAULT_API_VERSION),
    }
}

/// Deployment names cannot contain dots
fn deployment_name(model: &str) -> String {
    model.replace('.', "")
}

/// Azure OpenAI adaptor
#[derive(Debug, Clone, Copy, Default)]
pub struct AzureAdaptor {
    base: OpenAIAdaptor,
}

impl AzureAdaptor {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Adaptor for AzureAdaptor {
    fn name(&self) -> &'static str {
        "azure"
    }

    /// Azure has no shared endpoint; every channel must set its resource URL
    fn default_base_url(&self) -> &'static str {
        ""
    }

    fn supported_modes(&self) -> &'static [Mode] {
        MODES
    }

    fn request_url(&self, meta: &Meta) -> RelayResult<RequestUrl> {
        let mode = meta.mode();
        if !MODES.contains(&mode) {
            return Err(RelayError::UnsupportedMode { mode });
        }
        let base_url = meta.base_url();
        if base_url.is_empty() {
            return Err(RelayError::InvalidRequest(format!(
                "channel {} has no Azure resource URL",
                meta.channel.id
            )));
        }

        let missing = |what: &str| RelayError::InvalidRequest(format!("{} is required", what));
        let url = match mode {
            Mode::VideoGenerationsJobs => RequestUrl::post(format!(
                "{}/openai/v1/video/generations/jobs?api-version={}",
                base_url, VIDEO_API_VERSION
            )),
            Mode::VideoGenerationsGetJobs => {
                let job_id = meta.job_id.as_deref().ok_or_else(|| missing("job id"))?;
                RequestUrl::get(format!(
                    "{}/openai/v1/video/generations/jobs/{}?api-version={}",
                    base_url, job_id, VIDEO_API_VERSION
                ))
            }
            Mode::VideoGenerationsContent => {
                let generation_id = meta
                    .generation_id
                    .as_deref()
                    .ok_or_else(|| missing("generation id"))?;
                RequestUrl::get(format!(
                    "{}/openai/v1/video/generations/{}/content/video?api-version={}",
                    base_url, generation_id, VIDEO_API_VERSION
                ))
            }
            _ => {
                let path = super::openai::path_for(mode).ok_or(RelayError::UnsupportedMode { mode })?;
                let (_, api_version) = parse_key(&meta.channel.key);
                RequestUrl::post(format!(
                    "{}/openai/deployments/{}{}?api-version={}",
                    base_url,
                    deployment_name(&meta.actual_model),
                    path,
                    api_version
                ))
            }
        };
        Ok(url)
    }

    fn convert_request(&self, meta: &mut Meta, request: &InboundRequest) -> RelayResult<ConvertResult> {
        match meta.mode() {
            Mode::VideoGenerationsGetJobs | Mode::VideoGenerationsContent => Ok(ConvertResult::empty()),
            Mode::ChatCompletions | Mode::Completions => {
                self.base.convert_with(meta, request, REQUEST_TRANSFORMS)
            }
            _ => self.base.convert_with(meta, request, &[]),
        }
    }

    fn setup_request_header(&self, meta: &Meta, headers: &mut HeaderMap) -> RelayResult<()> {
        let (token, _) = parse_key(&meta.channel.key);
        insert_header(headers, "api-key", token)
    }

    async fn do_response(
        &self,
        meta: &Meta,
        response: reqwest::Response,
        writer: &mut ResponseWriter,
    ) -> Result<Usage, ResponseError> {
        match meta.mode() {
            Mode::VideoGenerationsJobs
            | Mode::VideoGenerationsGetJobs
            | Mode::VideoGenerationsContent => {
                if !response.status().is_success() {
                    return Err(read_upstream_error(response, decode_openai_error).await.into());
                }
                passthrough_handler(response, writer).await?;
                Ok(Usage::default())
            }
            _ => {
                self.base
                    .handle_response(
                        meta,
                        response,
                        writer,
                        ResponseHooks::default(),
                        decode_openai_error,
                    )
                    .await
            }
        }
    }

    fn metadata(&self) -> AdaptorMetadata {
        let mut metadata = self.base.metadata();
        metadata.name = self.name();
        metadata.default_base_url = "";
        metadata.modes = MODES.to_vec();
        metadata.key_help = "token|api-version (api-version optional)";
        metadata.features = &["deployment URLs", "video generation jobs"];
        metadata
    }
}

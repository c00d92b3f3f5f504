//! OpenAI-compatible providers
//!
//! Providers that only differ from OpenAI in base URL, supported modes and a few
//! response quirks. Each one is a static `CompatibleProfile` wrapped by
//! `CompatibleAdaptor`.

use super::openai::{decode_openai_error, OpenAIAdaptor};
use crate::models::Usage;
use crate::relay::adaptor::{
    Adaptor, AdaptorMetadata, BalanceFetcher, ConvertResult, InboundRequest, RequestUrl,
};
use crate::relay::node::{self, NodeTransform};
use crate::relay::stream::{ResponseHooks, UsagePolicy};
use crate::relay::{Channel, ChannelType, Meta, Mode, ResponseWriter};
use crate::utils::error::{ErrorContext, RelayError, RelayResult, ResponseError};
use async_trait::async_trait;
use axum::http::HeaderMap;
use serde_json::Value;
use tracing::debug;

/// Account balance endpoint of a provider
#[derive(Debug)]
pub struct BalanceSpec {
    /// Path appended to the channel's base URL
    pub path: &'static str,
    /// Pulls the available balance out of the response body
    pub extract: fn(&Value) -> Option<f64>,
}

/// Static description of an OpenAI-compatible provider
#[derive(Debug)]
pub struct CompatibleProfile {
    pub name: &'static str,
    pub channel_type: ChannelType,
    pub default_base_url: &'static str,
    pub modes: &'static [Mode],
    pub models: &'static [&'static str],
    /// Run on every response body or stream chunk
    pub response_transforms: &'static [NodeTransform],
    pub policy: UsagePolicy,
    pub balance: Option<BalanceSpec>,
    /// Chat path override for model ids with this prefix
    pub bot_prefix: Option<(&'static str, &'static str)>,
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// `{"balance_infos":[{"currency":"CNY","total_balance":"110.00"}]}`
fn deepseek_balance(body: &Value) -> Option<f64> {
    body.get("balance_infos")?
        .as_array()?
        .iter()
        .filter_map(|info| info.get("total_balance").and_then(number))
        .reduce(f64::max)
}

/// `{"data":{"available_balance":49.5}}`
fn moonshot_balance(body: &Value) -> Option<f64> {
    node::get(body, "data.available_balance").and_then(number)
}

pub static DEEPSEEK: CompatibleProfile = CompatibleProfile {
    name: "deepseek",
    channel_type: ChannelType::DeepSeek,
    default_base_url: "https://api.deepseek.com",
    modes: &[Mode::ChatCompletions, Mode::Completions],
    models: &["deepseek-chat", "deepseek-reasoner"],
    response_transforms: &[],
    policy: UsagePolicy::LastWins,
    balance: Some(BalanceSpec {
        path: "/user/balance",
        extract: deepseek_balance,
    }),
    bot_prefix: None,
};

pub static MOONSHOT: CompatibleProfile = CompatibleProfile {
    name: "moonshot",
    channel_type: ChannelType::Moonshot,
    default_base_url: "https://api.moonshot.cn/v1",
    modes: &[Mode::ChatCompletions],
    models: &["kimi-k2-0905-preview", "moonshot-v1-8k", "moonshot-v1-128k"],
    response_transforms: &[node::hoist_choice_usage],
    policy: UsagePolicy::LastWins,
    balance: Some(BalanceSpec {
        path: "/users/me/balance",
        extract: moonshot_balance,
    }),
    bot_prefix: None,
};

pub static GROQ: CompatibleProfile = CompatibleProfile {
    name: "groq",
    channel_type: ChannelType::Groq,
    default_base_url: "https://api.groq.com/openai/v1",
    modes: &[
        Mode::ChatCompletions,
        Mode::AudioTranscription,
        Mode::AudioTranslation,
    ],
    models: &["llama-3.3-70b-versatile", "whisper-large-v3"],
    response_transforms: &[],
    policy: UsagePolicy::LastWins,
    balance: None,
    bot_prefix: None,
};

pub static MISTRAL: CompatibleProfile = CompatibleProfile {
    name: "mistral",
    channel_type: ChannelType::Mistral,
    default_base_url: "https://api.mistral.ai/v1",
    modes: &[Mode::ChatCompletions, Mode::Embeddings, Mode::Moderations],
    models: &["mistral-large-latest", "mistral-small-latest", "mistral-embed"],
    response_transforms: &[],
    policy: UsagePolicy::LastWins,
    balance: None,
    bot_prefix: None,
};

pub static OPENROUTER: CompatibleProfile = CompatibleProfile {
    name: "openrouter",
    channel_type: ChannelType::OpenRouter,
    default_base_url: "https://openrouter.ai/api/v1",
    modes: &[Mode::ChatCompletions, Mode::Completions],
    models: &["openai/gpt-4o", "anthropic/claude-sonnet-4.5", "deepseek/deepseek-r1"],
    response_transforms: &[node::rename_reasoning],
    policy: UsagePolicy::LastWins,
    balance: None,
    bot_prefix: None,
};

pub static DOUBAO: CompatibleProfile = CompatibleProfile {
    name: "doubao",
    channel_type: ChannelType::Doubao,
    default_base_url: "https://ark.cn-beijing.volces.com/api/v3",
    modes: &[
        Mode::ChatCompletions,
        Mode::Embeddings,
        Mode::ImagesGenerations,
    ],
    models: &["doubao-seed-1-6-250615", "doubao-embedding-large-text-250515", "bot-"],
    response_transforms: &[node::lift_bot_usage],
    policy: UsagePolicy::SumWebSearch,
    balance: None,
    bot_prefix: Some(("bot-", "/bots/chat/completions")),
};

/// Every shipped compatible provider
pub static PROFILES: [&CompatibleProfile; 6] = [&DEEPSEEK, &MOONSHOT, &GROQ, &MISTRAL, &OPENROUTER, &DOUBAO];

/// Adaptor for one OpenAI-compatible provider
#[derive(Debug, Clone, Copy)]
pub struct CompatibleAdaptor {
    base: OpenAIAdaptor,
    profile: &'static CompatibleProfile,
}

impl CompatibleAdaptor {
    pub fn new(profile: &'static CompatibleProfile) -> Self {
        Self {
            base: OpenAIAdaptor::new(),
            profile,
        }
    }

    pub fn profile(&self) -> &'static CompatibleProfile {
        self.profile
    }

    fn hooks(&self) -> ResponseHooks {
        ResponseHooks {
            policy: self.profile.policy,
            transforms: self.profile.response_transforms,
        }
    }
}

#[async_trait]
impl Adaptor for CompatibleAdaptor {
    fn name(&self) -> &'static str {
        self.profile.name
    }

    fn default_base_url(&self) -> &'static str {
        self.profile.default_base_url
    }

    fn supported_modes(&self) -> &'static [Mode] {
        self.profile.modes
    }

    fn request_url(&self, meta: &Meta) -> RelayResult<RequestUrl> {
        if let Some((prefix, path)) = self.profile.bot_prefix {
            if meta.mode() == Mode::ChatCompletions && meta.actual_model.starts_with(prefix) {
                return Ok(RequestUrl::post(format!("{}{}", meta.base_url(), path)));
            }
        }
        self.base
            .request_url_for(meta.base_url(), meta.mode(), self.profile.modes)
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
        self.base
            .handle_response(meta, response, writer, self.hooks(), decode_openai_error)
            .await
    }

    fn metadata(&self) -> AdaptorMetadata {
        AdaptorMetadata {
            name: self.profile.name,
            default_base_url: self.profile.default_base_url,
            modes: self.profile.modes.to_vec(),
            models: self.profile.models,
            key_help: "Bearer API key",
            features: if self.profile.balance.is_some() {
                &["OpenAI-compatible", "balance query"]
            } else {
                &["OpenAI-compatible"]
            },
        }
    }

    fn balance_fetcher(&self) -> Option<&dyn BalanceFetcher> {
        self.profile.balance.as_ref().map(|_| self as &dyn BalanceFetcher)
    }
}

#[async_trait]
impl BalanceFetcher for CompatibleAdaptor {
    async fn balance(&self, client: &reqwest::Client, channel: &Channel) -> RelayResult<f64> {
        let query = self.profile.balance.as_ref().ok_or_else(|| {
            RelayError::InvalidRequest(format!("{} does not report balances", self.profile.name))
        })?;

        let base_url = if channel.base_url.is_empty() {
            self.profile.default_base_url
        } else {
            channel.base_url.trim_end_matches('/')
        };
        let url = format!("{}{}", base_url, query.path);
        debug!("Fetching balance for channel {} from {}", channel.id, url);

        let response = client
            .get(&url)
            .bearer_auth(&channel.key)
            .send()
            .await
            .map_err(RelayError::transport)?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.bytes().await.map_err(RelayError::transport)?;
            return Err(decode_openai_error(status, &body));
        }

        let body: Value = response
            .json()
            .await
            .decode_context("Failed to decode balance response")?;
        (query.extract)(&body)
            .ok_or_else(|| RelayError::Decode("balance missing from response".to_string()))
    }
}

//! Per-request relay context
//!
//! `Meta` threads the resolved mode, the selected channel and the model-name
//! bookkeeping through every pipeline stage.

use super::mode::{Endpoint, Mode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Upstream provider type of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    OpenAI,
    Azure,
    Anthropic,
    Baidu,
    Cohere,
    DeepSeek,
    Moonshot,
    Groq,
    Mistral,
    OpenRouter,
    Doubao,
}

impl ChannelType {
    pub const ALL: [ChannelType; 11] = [
        ChannelType::OpenAI,
        ChannelType::Azure,
        ChannelType::Anthropic,
        ChannelType::Baidu,
        ChannelType::Cohere,
        ChannelType::DeepSeek,
        ChannelType::Moonshot,
        ChannelType::Groq,
        ChannelType::Mistral,
        ChannelType::OpenRouter,
        ChannelType::Doubao,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::OpenAI => "openai",
            ChannelType::Azure => "azure",
            ChannelType::Anthropic => "anthropic",
            ChannelType::Baidu => "baidu",
            ChannelType::Cohere => "cohere",
            ChannelType::DeepSeek => "deepseek",
            ChannelType::Moonshot => "moonshot",
            ChannelType::Groq => "groq",
            ChannelType::Mistral => "mistral",
            ChannelType::OpenRouter => "openrouter",
            ChannelType::Doubao => "doubao",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChannelType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown channel type: {}", s))
    }
}

/// One upstream account: provider type, base URL, secret and extra config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: u64,
    pub name: String,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    /// Empty means "use the adaptor default"
    #[serde(default)]
    pub base_url: String,
    #[serde(default, skip_serializing)]
    pub key: String,
    /// Type-specific settings
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl Channel {
    pub fn new(id: u64, channel_type: ChannelType, key: impl Into<String>) -> Self {
        Self {
            id,
            name: format!("{}-{}", channel_type, id),
            channel_type,
            base_url: String::new(),
            key: key.into(),
            config: Map::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// String value from the channel's type-specific config
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
    }
}

/// Per-request context
#[derive(Debug, Clone)]
pub struct Meta {
    mode: Mode,
    pub channel: Channel,
    /// Model name as requested by the caller
    pub origin_model: String,
    /// Model name sent upstream
    pub actual_model: String,
    pub request_at: DateTime<Utc>,
    pub request_id: String,
    /// Input tokens counted locally before relaying
    pub input_tokens: u64,
    pub job_id: Option<String>,
    pub generation_id: Option<String>,
}

impl Meta {
    pub fn new(
        mode: Mode,
        channel: Channel,
        origin_model: impl Into<String>,
        actual_model: impl Into<String>,
    ) -> Self {
        Self {
            mode,
            channel,
            origin_model: origin_model.into(),
            actual_model: actual_model.into(),
            request_at: Utc::now(),
            request_id: uuid::Uuid::new_v4().simple().to_string(),
            input_tokens: 0,
            job_id: None,
            generation_id: None,
        }
    }

    /// Build from a classified endpoint, carrying its job identifiers over
    pub fn from_endpoint(
        endpoint: &Endpoint,
        channel: Channel,
        origin_model: impl Into<String>,
        actual_model: impl Into<String>,
    ) -> Self {
        let mut meta = Self::new(endpoint.mode, channel, origin_model, actual_model);
        meta.job_id = endpoint.job_id.clone();
        meta.generation_id = endpoint.generation_id.clone();
        meta
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_input_tokens(mut self, input_tokens: u64) -> Self {
        self.input_tokens = input_tokens;
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.channel.base_url.trim_end_matches('/')
    }
}

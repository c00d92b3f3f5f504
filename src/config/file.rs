//! File-based configuration loading
//!
//! Loads the channel list and model catalog from a JSON file. Read once at
//! startup and shared read-only afterwards.

use crate::models::Price;
use crate::relay::{Channel, ChannelType, Mode};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "AIRELAY_CONFIG";

const CONFIG_FILE_NAME: &str = "airelay.json";

/// Application configuration loaded from JSON file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Upstream channels, in selection order
    pub channels: Vec<ChannelConfig>,

    /// Model catalog keyed by the model name callers request
    #[serde(default)]
    pub models: HashMap<String, ModelConfig>,
}

/// One configured upstream channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub id: u64,

    #[serde(default)]
    pub name: String,

    #[serde(rename = "type")]
    pub channel_type: ChannelType,

    /// Empty means the adaptor default
    #[serde(rename = "baseUrl", default)]
    pub base_url: String,

    /// Secret key. `${VAR}` reads it from the environment.
    #[serde(default)]
    pub key: String,

    /// Type-specific settings
    #[serde(default)]
    pub config: Map<String, Value>,

    /// Models this channel serves
    #[serde(default)]
    pub models: Vec<String>,

    /// Requested model → upstream model
    #[serde(rename = "modelMapping", default)]
    pub model_mapping: HashMap<String, String>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Model catalog entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub mode: Mode,

    #[serde(default)]
    pub owner: String,

    #[serde(default)]
    pub price: Price,

    #[serde(rename = "maxTokens", skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(rename = "toolChoice", default)]
    pub tool_choice: bool,

    #[serde(default)]
    pub vision: bool,
}

impl ChannelConfig {
    pub fn serves(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }

    /// Upstream name for a requested model
    pub fn map_model<'a>(&'a self, model: &'a str) -> &'a str {
        self.model_mapping.get(model).map(String::as_str).unwrap_or(model)
    }

    /// Runtime channel, with `${VAR}` keys resolved
    pub fn to_channel(&self) -> Channel {
        let name = if self.name.is_empty() {
            format!("{}-{}", self.channel_type, self.id)
        } else {
            self.name.clone()
        };
        Channel {
            id: self.id,
            name,
            channel_type: self.channel_type,
            base_url: self.base_url.clone(),
            key: resolve_key(&self.key),
            config: self.config.clone(),
        }
    }
}

fn resolve_key(key: &str) -> String {
    match key.strip_prefix("${").and_then(|k| k.strip_suffix('}')) {
        Some(var) => std::env::var(var).unwrap_or_default(),
        None => key.to_string(),
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading configuration from: {:?}", path);

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: AppConfig =
            serde_json::from_str(&content).with_context(|| "Failed to parse config JSON")?;

        config.validate()?;

        debug!(
            "Loaded {} channels and {} catalog models",
            config.channels.len(),
            config.models.len()
        );
        Ok(config)
    }

    /// Load configuration from default locations
    /// Searches in order:
    /// 1. `explicit` (usually `$AIRELAY_CONFIG`)
    /// 2. ~/.config/airelay/airelay.json
    /// 3. ./airelay.json
    pub fn load_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        for candidate in Self::search_paths() {
            if candidate.exists() {
                return Self::load(&candidate);
            }
        }

        anyhow::bail!(
            "Configuration file not found. Set {} or create one at:\n\
             - ~/.config/airelay/airelay.json (recommended)\n\
             - ./airelay.json (current directory)",
            CONFIG_ENV
        )
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(config_dir) = dirs::home_dir().map(|h| h.join(".config")) {
            paths.push(config_dir.join("airelay").join(CONFIG_FILE_NAME));
        }
        paths.push(PathBuf::from(CONFIG_FILE_NAME));
        paths
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            anyhow::bail!("At least one channel must be configured");
        }

        let mut ids = HashSet::new();
        for channel in &self.channels {
            if !ids.insert(channel.id) {
                anyhow::bail!("Duplicate channel id {}", channel.id);
            }

            if !channel.base_url.is_empty() && !channel.base_url.starts_with("http") {
                anyhow::bail!(
                    "Invalid base URL for channel {}: {}",
                    channel.id,
                    channel.base_url
                );
            }

            if channel.channel_type == ChannelType::Azure && channel.base_url.is_empty() {
                anyhow::bail!("Azure channel {} must set baseUrl", channel.id);
            }

            if channel.models.is_empty() {
                anyhow::bail!("Channel {} must serve at least one model", channel.id);
            }

            for mapped in channel.model_mapping.keys() {
                if !channel.serves(mapped) {
                    anyhow::bail!(
                        "Channel {} maps model '{}' which it does not serve",
                        channel.id,
                        mapped
                    );
                }
            }
        }

        for (name, model) in &self.models {
            for band in &model.price.conditional_prices {
                let c = &band.condition;
                if (c.input_token_max != 0 && c.input_token_min > c.input_token_max)
                    || (c.output_token_max != 0 && c.output_token_min > c.output_token_max)
                {
                    anyhow::bail!("Model '{}' has a price band with min above max", name);
                }
            }
        }

        Ok(())
    }

    /// First enabled channel that serves `model` and whose adaptor handles `mode`.
    /// Job lookups carry no model, so any channel handling the mode qualifies.
    pub fn select_channel(
        &self,
        mode: Mode,
        model: &str,
        supports: impl Fn(ChannelType, Mode) -> bool,
    ) -> Option<&ChannelConfig> {
        self.channels.iter().find(|channel| {
            channel.enabled
                && supports(channel.channel_type, mode)
                && (mode.is_job_lookup() || channel.serves(model))
        })
    }

    pub fn model(&self, name: &str) -> Option<&ModelConfig> {
        self.models.get(name)
    }

    /// Every model served by an enabled channel, sorted
    pub fn list_models(&self) -> Vec<&str> {
        let mut models: Vec<&str> = self
            .channels
            .iter()
            .filter(|c| c.enabled)
            .flat_map(|c| c.models.iter().map(String::as_str))
            .collect();
        models.sort_unstable();
        models.dedup();
        models
    }

    /// Owner of a model, falling back to the type of the first channel serving it
    pub fn owner_of(&self, model: &str) -> String {
        if let Some(owner) = self.model(model).map(|m| &m.owner).filter(|o| !o.is_empty()) {
            return owner.clone();
        }
        self.channels
            .iter()
            .find(|c| c.serves(model))
            .map(|c| c.channel_type.to_string())
            .unwrap_or_default()
    }
}

//! Adaptor registry
//!
//! Maps channel types to adaptor instances. Built once before serving traffic and
//! only read afterwards, so lookups need no locking.

use super::adaptor::Adaptor;
use super::meta::ChannelType;
use crate::providers::compatible::PROFILES;
use crate::providers::{
    AnthropicAdaptor, AzureAdaptor, BaiduAdaptor, CohereAdaptor, CompatibleAdaptor, OpenAIAdaptor,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Read-only channel type → adaptor table
#[derive(Clone)]
pub struct AdaptorRegistry {
    adaptors: HashMap<ChannelType, Arc<dyn Adaptor>>,
}

impl AdaptorRegistry {
    /// Registry with every shipped adaptor
    pub fn builtin() -> Self {
        let mut adaptors: HashMap<ChannelType, Arc<dyn Adaptor>> = HashMap::new();
        adaptors.insert(ChannelType::OpenAI, Arc::new(OpenAIAdaptor::new()));
        adaptors.insert(ChannelType::Azure, Arc::new(AzureAdaptor::new()));
        adaptors.insert(ChannelType::Anthropic, Arc::new(AnthropicAdaptor::new()));
        adaptors.insert(ChannelType::Baidu, Arc::new(BaiduAdaptor::new()));
        adaptors.insert(ChannelType::Cohere, Arc::new(CohereAdaptor::new()));
        for profile in PROFILES {
            adaptors.insert(profile.channel_type, Arc::new(CompatibleAdaptor::new(profile)));
        }

        info!("Adaptor registry initialized with {} adaptors", adaptors.len());
        Self { adaptors }
    }

    /// Build from an explicit set of adaptors
    pub fn from_adaptors(adaptors: impl IntoIterator<Item = (ChannelType, Arc<dyn Adaptor>)>) -> Self {
        Self {
            adaptors: adaptors.into_iter().collect(),
        }
    }

    pub fn get(&self, channel_type: ChannelType) -> Option<Arc<dyn Adaptor>> {
        self.adaptors.get(&channel_type).cloned()
    }

    pub fn len(&self) -> usize {
        self.adaptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adaptors.is_empty()
    }

    /// Registered adaptors, ordered by channel type name
    pub fn iter(&self) -> impl Iterator<Item = (ChannelType, &Arc<dyn Adaptor>)> {
        let mut entries: Vec<_> = self.adaptors.iter().map(|(t, a)| (*t, a)).collect();
        entries.sort_by_key(|(t, _)| t.as_str());
        entries.into_iter()
    }
}

impl std::fmt::Debug for AdaptorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptorRegistry")
            .field("adaptors", &self.iter().map(|(t, _)| t).collect::<Vec<_>>())
            .finish()
    }
}

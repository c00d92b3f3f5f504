//! Provider module
//!
//! Adaptor implementations for every supported upstream. All of them compose the
//! OpenAI base adaptor except Anthropic, whose wire format differs throughout.

pub mod anthropic;
pub mod azure;
pub mod baidu;
pub mod cohere;
pub mod compatible;
pub mod openai;

pub use anthropic::AnthropicAdaptor;
pub use azure::AzureAdaptor;
pub use baidu::BaiduAdaptor;
pub use cohere::CohereAdaptor;
pub use compatible::CompatibleAdaptor;
pub use openai::OpenAIAdaptor;

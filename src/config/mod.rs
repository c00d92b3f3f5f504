//! Configuration management module
//!
//! Environment settings plus the JSON channel/model file

pub mod file;
pub mod settings;

pub use file::{AppConfig, ChannelConfig, ModelConfig};
pub use settings::Settings;

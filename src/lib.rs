//! AI relay gateway library
//!
//! Accepts one uniform completion API and relays each request to one of many
//! upstream providers, normalizing responses, usage and errors on the way back.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod providers;
pub mod relay;
pub mod utils;

// Re-export common types
pub use config::{AppConfig, Settings};
pub use handlers::{create_router, router_with_state, AppState};
pub use models::{Price, Usage};
pub use relay::{Adaptor, AdaptorRegistry, Channel, ChannelType, Meta, Mode, Relay, RelayOutcome};
pub use utils::error::{RelayError, RelayResult};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Library description
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get version information
pub fn version_info() -> String {
    format!("{} v{} - {}", NAME, VERSION, DESCRIPTION)
}

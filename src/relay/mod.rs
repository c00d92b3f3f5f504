//! Relay pipeline
//!
//! Mode classification, per-request context, the adaptor contract and the
//! orchestrator that drives it, plus response normalization helpers shared by the
//! providers.

pub mod adaptor;
pub mod controller;
pub mod detail;
pub mod meta;
pub mod mode;
pub mod node;
pub mod pool;
pub mod registry;
pub mod stream;
pub mod tokenizer;
pub mod writer;

pub use adaptor::{Adaptor, AdaptorMetadata, ConvertResult, InboundRequest, RequestUrl};
pub use controller::{Relay, RelayOutcome, RelayState};
pub use detail::RequestDetail;
pub use meta::{Channel, ChannelType, Meta};
pub use mode::{classify, Endpoint, Mode};
pub use registry::AdaptorRegistry;
pub use stream::UsagePolicy;
pub use writer::{ResponseReceiver, ResponseWriter};

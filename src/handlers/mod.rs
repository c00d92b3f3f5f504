//! HTTP handlers module
//!
//! Inbound API surface: every relayed endpoint, the model listing and health checks

pub mod catalog;
pub mod health;
pub mod relay;

use crate::config::{AppConfig, Settings};
use crate::middleware::request_id_middleware;
use crate::relay::{AdaptorRegistry, Mode, Relay};
use crate::utils::error::RelayError;
use crate::utils::logging::{LogUsageSink, UsageSink};
use anyhow::Result;
use axum::{
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

/// Application state
pub struct AppState {
    pub settings: Settings,
    pub config: AppConfig,
    pub registry: AdaptorRegistry,
    pub relay: Relay,
    pub sink: Arc<dyn UsageSink>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(settings: Settings, config: AppConfig, client: reqwest::Client) -> Self {
        let relay = Relay::new(client, settings.relay.capture_limit, settings.relay.debug);
        Self {
            settings,
            config,
            registry: AdaptorRegistry::builtin(),
            relay,
            sink: Arc::new(LogUsageSink),
            started_at: Instant::now(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn UsageSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Whether the adaptor registered for `channel_type` handles `mode`
    pub fn supports(&self, channel_type: crate::relay::ChannelType, mode: Mode) -> bool {
        self.registry
            .get(channel_type)
            .is_some_and(|adaptor| adaptor.supports(mode))
    }
}

/// Create application router
pub async fn create_router(settings: Settings, config: AppConfig) -> Result<Router> {
    let client = settings.http_client()?;
    let state = Arc::new(AppState::new(settings, config, client));
    Ok(router_with_state(state))
}

/// Router over an existing state
pub fn router_with_state(state: Arc<AppState>) -> Router {
    let max_request_size = state.settings.request.max_request_size;

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(middleware::from_fn(request_id_middleware))
        .layer(RequestBodyLimitLayer::new(max_request_size));

    Router::new()
        .route("/v1/chat/completions", post(relay::handle_relay))
        .route("/v1/completions", post(relay::handle_relay))
        .route("/v1/embeddings", post(relay::handle_relay))
        .route("/v1/engines/:model/embeddings", post(relay::handle_relay))
        .route("/v1/moderations", post(relay::handle_relay))
        .route("/v1/images/generations", post(relay::handle_relay))
        .route("/v1/images/edits", post(relay::handle_relay))
        .route("/v1/audio/speech", post(relay::handle_relay))
        .route("/v1/audio/transcriptions", post(relay::handle_relay))
        .route("/v1/audio/translations", post(relay::handle_relay))
        .route("/v1/rerank", post(relay::handle_relay))
        .route("/v1/parse/pdf", post(relay::handle_relay))
        .route("/v1/messages", post(relay::handle_relay))
        .route("/v1/video/generations/jobs", post(relay::handle_relay))
        .route("/v1/video/generations/jobs/:id", get(relay::handle_relay))
        .route(
            "/v1/video/generations/:id/content/video",
            get(relay::handle_relay),
        )
        .route("/v1/models", get(catalog::list_models))
        .route("/health", get(health::health_check))
        .route("/health/live", get(health::liveness_check))
        .fallback(not_found)
        .with_state(state)
        .layer(middleware_stack)
}

async fn not_found() -> Response {
    RelayError::NotFound("unknown endpoint".to_string()).into_response()
}

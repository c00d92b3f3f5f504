//! AI relay gateway server
//!
//! Serves the uniform API and relays each call to the configured upstream channel

use airelay::config::{AppConfig, Settings};
use airelay::handlers::create_router;
use airelay::utils::logging::init_logging;
use anyhow::{Context, Result};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::new().context("Failed to load server settings")?;

    init_logging(&settings.logging.level, &settings.logging.format)?;
    info!("{}", airelay::version_info());

    let app_config = AppConfig::load_default(settings.config_path.as_deref())
        .context("Failed to load channel configuration")?;
    info!(
        "Channel configuration loaded: {} channels, {} models",
        app_config.channels.len(),
        app_config.list_models().len()
    );

    let app = create_router(settings.clone(), app_config).await?;

    let addr = settings.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Server listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start server: {}", e))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

//! Application configuration settings
//!
//! Server, upstream client and logging settings read from the environment

use crate::relay::writer::MAX_CAPTURE_BYTES;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Server configuration
    pub server: ServerConfig,
    /// Upstream client configuration
    pub upstream: UpstreamConfig,
    /// Request configuration
    pub request: RequestConfig,
    /// Relay diagnostics
    pub relay: RelayConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Explicit channel/model config file
    pub config_path: Option<PathBuf>,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen host
    pub host: String,
    /// Listen port
    pub port: u16,
}

/// Shared upstream HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Connect timeout in seconds
    pub connect_timeout: u64,
    /// Whole-request timeout in seconds (0 disables it, streams can run long)
    pub timeout: u64,
}

/// Request configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestConfig {
    /// Maximum request size in bytes
    pub max_request_size: usize,
}

/// Relay diagnostics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Log captured request/response bodies
    pub debug: bool,
    /// Response capture cap in bytes
    pub capture_limit: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (text/json)
    pub format: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            upstream: UpstreamConfig {
                connect_timeout: 10,
                timeout: 0,
            },
            request: RequestConfig {
                max_request_size: 32 * 1024 * 1024,
            },
            relay: RelayConfig {
                debug: false,
                capture_limit: MAX_CAPTURE_BYTES,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "text".to_string(),
            },
            config_path: None,
        }
    }
}

impl Settings {
    /// Load settings from the environment (and `.env` if present)
    pub fn new() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let get = |key: &str, default: String| lookup(key).unwrap_or(default);

        let settings = Self {
            server: ServerConfig {
                host: get("SERVER_HOST", defaults.server.host),
                port: get("SERVER_PORT", defaults.server.port.to_string())
                    .parse()
                    .context("Invalid port number")?,
            },
            upstream: UpstreamConfig {
                connect_timeout: get("UPSTREAM_CONNECT_TIMEOUT", defaults.upstream.connect_timeout.to_string())
                    .parse()
                    .context("Invalid upstream connect timeout")?,
                timeout: get("UPSTREAM_TIMEOUT", defaults.upstream.timeout.to_string())
                    .parse()
                    .context("Invalid upstream timeout")?,
            },
            request: RequestConfig {
                max_request_size: get("MAX_REQUEST_SIZE", defaults.request.max_request_size.to_string())
                    .parse()
                    .context("Invalid maximum request size")?,
            },
            relay: RelayConfig {
                debug: get("RELAY_DEBUG", defaults.relay.debug.to_string())
                    .parse()
                    .context("Invalid RELAY_DEBUG flag")?,
                capture_limit: get("CAPTURE_LIMIT", defaults.relay.capture_limit.to_string())
                    .parse()
                    .context("Invalid capture limit")?,
            },
            logging: LoggingConfig {
                level: get("LOG_LEVEL", defaults.logging.level),
                format: get("LOG_FORMAT", defaults.logging.format),
            },
            config_path: lookup("AIRELAY_CONFIG").filter(|p| !p.is_empty()).map(PathBuf::from),
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration validity
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Port number cannot be 0");
        }

        if self.upstream.connect_timeout == 0 {
            anyhow::bail!("Upstream connect timeout cannot be 0");
        }

        if self.request.max_request_size == 0 {
            anyhow::bail!("Maximum request size cannot be 0");
        }

        if self.relay.capture_limit == 0 {
            anyhow::bail!("Capture limit cannot be 0");
        }

        if self.relay.capture_limit > MAX_CAPTURE_BYTES {
            anyhow::bail!(
                "Capture limit {} exceeds the maximum of {} bytes",
                self.relay.capture_limit,
                MAX_CAPTURE_BYTES
            );
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            anyhow::bail!("Invalid log level: {}", self.logging.level);
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            anyhow::bail!("Invalid log format: {}", self.logging.format);
        }

        Ok(())
    }

    /// Listen address
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Shared upstream client. Cancellation and deadlines live here, not in the relay.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(self.upstream.connect_timeout))
            .pool_idle_timeout(Duration::from_secs(90));
        if self.upstream.timeout > 0 {
            builder = builder.timeout(Duration::from_secs(self.upstream.timeout));
        }
        builder.build().context("Failed to build upstream HTTP client")
    }
}

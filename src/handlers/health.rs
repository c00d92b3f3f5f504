//! Health check handlers
//!
//! Provides application health status check endpoints

use crate::handlers::AppState;
use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Service name
    pub service: String,
    /// Version information
    pub version: String,
    /// Timestamp
    pub timestamp: String,
    /// Details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HealthDetails>,
}

/// Check result
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthDetails {
    /// Enabled channels
    pub channels: usize,
    /// Distinct models served
    pub models: usize,
    /// Registered adaptors
    pub adaptors: usize,
    /// Uptime in seconds
    pub uptime_seconds: u64,
    /// Resident memory in bytes (Linux only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_bytes: Option<u64>,
}

fn response(state: &AppState, status: &str) -> HealthResponse {
    HealthResponse {
        status: status.to_string(),
        service: crate::NAME.to_string(),
        version: crate::VERSION.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        details: Some(HealthDetails {
            channels: state.config.channels.iter().filter(|c| c.enabled).count(),
            models: state.config.list_models().len(),
            adaptors: state.registry.len(),
            uptime_seconds: state.started_at.elapsed().as_secs(),
            memory_bytes: resident_memory(),
        }),
    }
}

/// Basic health check
///
/// GET /health
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    debug!("Executing health check");
    let status = if state.config.channels.iter().any(|c| c.enabled) {
        "healthy"
    } else {
        "degraded"
    };
    Json(response(&state, status))
}

/// Liveness check
///
/// GET /health/live
/// Only confirms the process is serving; no dependency checks
pub async fn liveness_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    debug!("Executing liveness check");
    Json(response(&state, "alive"))
}

#[cfg(target_os = "linux")]
fn resident_memory() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|line| line.starts_with("VmRSS:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb * 1024)
}

#[cfg(not(target_os = "linux"))]
fn resident_memory() -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, Settings};

    fn create_test_state() -> Arc<AppState> {
        let config: AppConfig = serde_json::from_str(
            r#"{"channels": [{"id": 1, "type": "openai", "key": "sk-test", "models": ["gpt-4o"]}]}"#,
        )
        .unwrap();
        Arc::new(AppState::new(Settings::default(), config, reqwest::Client::new()))
    }

    #[tokio::test]
    async fn test_health_check() {
        let response = health_check(State(create_test_state())).await.0;
        assert_eq!(response.status, "healthy");
        assert_eq!(response.service, "airelay");
        let details = response.details.unwrap();
        assert_eq!(details.channels, 1);
        assert_eq!(details.models, 1);
        assert_eq!(details.adaptors, 11);
    }

    #[tokio::test]
    async fn test_liveness_check() {
        let response = liveness_check(State(create_test_state())).await.0;
        assert_eq!(response.status, "alive");
        assert!(response.details.is_some());
    }
}

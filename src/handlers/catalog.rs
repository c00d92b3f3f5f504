//! Model listing
//!
//! GET /v1/models in the OpenAI list shape

use crate::handlers::AppState;
use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<ModelEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelEntry {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<crate::relay::Mode>,
}

/// List every model served by an enabled channel
pub async fn list_models(State(state): State<Arc<AppState>>) -> Json<ModelList> {
    let created = state
        .started_at
        .elapsed()
        .as_secs()
        .try_into()
        .map(|elapsed: i64| chrono::Utc::now().timestamp() - elapsed)
        .unwrap_or_default();

    let data = state
        .config
        .list_models()
        .into_iter()
        .map(|id| ModelEntry {
            id: id.to_string(),
            object: "model".to_string(),
            created,
            owned_by: state.config.owner_of(id),
            mode: state.config.model(id).map(|m| m.mode),
        })
        .collect();

    Json(ModelList {
        object: "list".to_string(),
        data,
    })
}

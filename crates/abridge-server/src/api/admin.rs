//! Local administrative endpoints for the model lifecycle.

use axum::{extract::State, Json};
use serde::Serialize;
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ModelActionResponse {
    pub status: &'static str,
    pub model: String,
    pub device: String,
}

/// Force the shared model to load.
pub async fn load_model(State(state): State<AppState>) -> Result<Json<ModelActionResponse>, ApiError> {
    info!("Admin request: load model");
    let model = state.engine.load_model().await?;

    Ok(Json(ModelActionResponse {
        status: "loaded",
        model: model.name().to_string(),
        device: model.device().to_string(),
    }))
}

/// Drop the shared model; the next request loads it again.
pub async fn unload_model(State(state): State<AppState>) -> Json<ModelActionResponse> {
    info!("Admin request: unload model");
    let was_loaded = state.engine.unload_model().await;
    let status = state.engine.status().await;

    Json(ModelActionResponse {
        status: if was_loaded { "unloaded" } else { "not_loaded" },
        model: status.model,
        device: status.device,
    })
}

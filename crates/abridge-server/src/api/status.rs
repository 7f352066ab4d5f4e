//! Service status endpoint

use axum::{extract::State, Json};

use crate::state::AppState;
use abridge_core::ServiceStatus;

/// `GET /api/status`
pub async fn get_status(State(state): State<AppState>) -> Json<ServiceStatus> {
    Json(state.engine.status().await)
}

//! API routes and handlers

mod admin;
mod extract;
mod health;
mod status;
mod summarise;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the main API router
pub fn create_router(state: AppState, cors_enabled: bool) -> Router {
    let router = Router::new()
        .route("/Summarise", post(summarise::summarise))
        .route("/api/summarise", post(summarise::summarise_detailed))
        .route("/api/summarise-url", post(summarise::summarise_url))
        .route("/api/status", get(status::get_status))
        .route("/health", get(health::health_check))
        .route("/admin/model/load", post(admin::load_model))
        .route("/admin/model/unload", post(admin::unload_model))
        .layer(TraceLayer::new_for_http());

    let router = if cors_enabled {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.with_state(state)
}

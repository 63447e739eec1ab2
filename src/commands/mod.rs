//! HTTP surface of the signaling service.

mod candidate_api;
mod offer_api;

pub use candidate_api::add_candidate;
pub use offer_api::create_offer;

use crate::signaling::SignalingService;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub type AppState = Arc<SignalingService>;

/// Builds the router. `static_dir`, when given, serves the browser client
/// for every path not matched by the API.
pub fn router(service: AppState, static_dir: Option<&Path>) -> Router {
    let api = Router::new()
        .route("/offer", post(create_offer))
        .route("/candidate", post(add_candidate))
        .route("/health", get(health))
        .with_state(service);

    let app = match static_dir {
        Some(dir) => api.fallback_service(ServeDir::new(dir)),
        None => api,
    };
    app.layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn health(State(service): State<AppState>) -> Json<Value> {
    Json(json!({ "status": "ok", "sessions": service.session_count() }))
}

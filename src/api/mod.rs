pub mod rest;

use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use rest::{create_rest_router, AppState};

/// Full HTTP surface: REST routes plus CORS and request tracing.
pub fn create_router(state: Arc<AppState>) -> Router {
    create_rest_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

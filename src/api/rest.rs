use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::models::PoolQuery;
use crate::services::normalizer::canonical_query;
use crate::services::{PoolAggregator, PoolCache};

const ENDPOINTS: &[&str] = &[
    "GET /api/pools/:dex?chain=",
    "GET /api/health",
    "POST /api/cache/clear",
];

pub struct AppState {
    pub aggregator: Arc<PoolAggregator>,
    pub cache: Arc<PoolCache>,
    pub ttl: Duration,
}

#[derive(Debug, Default, Deserialize)]
pub struct PoolsParams {
    pub chain: Option<String>,
}

/// GET /api/pools/:dex - ranked pools, served from cache when fresh
async fn get_pools(
    State(state): State<Arc<AppState>>,
    Path(dex): Path<String>,
    Query(params): Query<PoolsParams>,
) -> Json<serde_json::Value> {
    let query = canonical_query(&PoolQuery::new(&dex, params.chain.as_deref()));
    let aggregator = state.aggregator.clone();
    let result = state
        .cache
        .get_or_compute(query.cache_key(), state.ttl, || async move {
            aggregator.aggregate(&query).await
        })
        .await;

    Json(json!({
        "success": true,
        "count": result.len(),
        "data": result.pools,
        "cached": result.cached,
        "source": result.source,
        "timestamp": result.generated_at,
        "providers": result.providers,
    }))
}

/// GET /api/health
async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "cache": state.cache.stats(),
        "timestamp": Utc::now(),
    }))
}

/// POST /api/cache/clear
async fn clear_cache(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    state.cache.clear();
    Json(json!({
        "success": true,
        "message": "Cache cleared",
    }))
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Not Found",
            "availableEndpoints": ENDPOINTS,
        })),
    )
}

pub fn create_rest_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/pools/:dex", get(get_pools))
        .route("/api/health", get(health))
        .route("/api/cache/clear", post(clear_cache))
        .fallback(not_found)
        .with_state(state)
}

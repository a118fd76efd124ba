use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pool_aggregator::api::{create_router, AppState};
use pool_aggregator::config::Config;
use pool_aggregator::services::{PoolAggregator, PoolCache};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pool_aggregator=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("🚀 Pool aggregator starting");

    let config = Config::load()?;
    tracing::info!(
        "✓ Configuration loaded: {} indexers, cache ttl {}s",
        config.sources.subgraphs.len(),
        config.cache.ttl_seconds
    );

    let aggregator = Arc::new(PoolAggregator::from_config(&config)?);
    let cache = Arc::new(PoolCache::new());

    let state = Arc::new(AppState {
        aggregator,
        cache,
        ttl: Duration::from_secs(config.cache.ttl_seconds),
    });
    let app = create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("✓ Server ready on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

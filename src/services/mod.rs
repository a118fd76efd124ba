pub mod aggregator;
pub mod cache;
pub mod metrics;
pub mod normalizer;

pub use aggregator::{PoolAggregator, Strategy, StrategyOutcome};
pub use cache::{CacheStats, PoolCache};
pub use normalizer::{Normalizer, Rejection};

pub mod pool;
pub mod query;
pub mod raw;
pub mod result;

pub use pool::{PoolMetrics, PoolRecord, PoolVersion, PoolWithMetrics, VolumeEstimate};
pub use query::{CacheKey, PoolQuery};
pub use raw::{RawBatch, RawPool};
pub use result::{AggregationResult, ProviderOutcome, ResultSource};

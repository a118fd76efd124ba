pub mod subgraph;
pub mod synthetic;
pub mod yields;

use async_trait::async_trait;
use std::time::Duration;

use crate::models::{PoolQuery, PoolVersion, RawBatch};

pub use subgraph::SubgraphSource;
pub use synthetic::SyntheticSource;
pub use yields::YieldsSource;

const USER_AGENT: &str = concat!("pool-aggregator/", env!("CARGO_PKG_VERSION"));

/// One client shared by every source. Per-request timeouts are set by each source.
pub fn http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(10))
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    GraphQl,
    Rest,
    Synthetic,
}

/// Identity of one upstream source.
///
/// For indexers `dex`, `version` and `chain` describe the single deployment
/// the endpoint covers. Listing sources span every dex and chain, so those
/// fields are `None` and the records carry their own.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDescriptor {
    pub name: String,
    pub kind: SourceKind,
    pub dex: Option<String>,
    pub version: Option<PoolVersion>,
    pub chain: Option<String>,
}

impl SourceDescriptor {
    pub fn listing(name: &str, kind: SourceKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            dex: None,
            version: None,
            chain: None,
        }
    }

    /// Whether this source can contribute records for the query.
    pub fn matches(&self, query: &PoolQuery) -> bool {
        let dex_ok = query.is_all_dexes()
            || self.dex.as_deref().map_or(true, |dex| dex == query.dex);
        let chain_ok = match (&query.chain, &self.chain) {
            (Some(wanted), Some(chain)) => wanted == chain,
            _ => true,
        };
        dex_ok && chain_ok
    }
}

#[async_trait]
pub trait PoolSource: Send + Sync {
    fn descriptor(&self) -> &SourceDescriptor;

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    /// Upper bound on one complete `fetch`, retries included.
    fn deadline(&self) -> Duration;

    async fn fetch(&self, query: &PoolQuery) -> Result<RawBatch, SourceError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error("{provider}: network error: {message}")]
    Network { provider: String, message: String },

    #[error("{provider}: timed out after {secs}s")]
    Timeout { provider: String, secs: u64 },

    #[error("{provider}: HTTP {status}")]
    Status { provider: String, status: u16 },

    #[error("{provider}: parse error: {message}")]
    Parse { provider: String, message: String },

    #[error("{provider}: GraphQL error: {message}")]
    GraphQl { provider: String, message: String },
}

impl SourceError {
    pub fn provider(&self) -> &str {
        match self {
            SourceError::Network { provider, .. }
            | SourceError::Timeout { provider, .. }
            | SourceError::Status { provider, .. }
            | SourceError::Parse { provider, .. }
            | SourceError::GraphQl { provider, .. } => provider,
        }
    }

    pub(crate) fn from_reqwest(provider: &str, err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            SourceError::Timeout {
                provider: provider.to_string(),
                secs: timeout.as_secs(),
            }
        } else if err.is_decode() {
            SourceError::Parse {
                provider: provider.to_string(),
                message: err.to_string(),
            }
        } else {
            SourceError::Network {
                provider: provider.to_string(),
                message: err.to_string(),
            }
        }
    }
}

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{PoolSource, SourceDescriptor, SourceError, SourceKind};
use crate::config::{SourcesConfig, SubgraphConfig};
use crate::models::raw::{SubgraphV2Pair, SubgraphV3Pool};
use crate::models::{PoolQuery, PoolVersion, RawBatch, RawPool};
use crate::services::normalizer::{canonical_chain, canonical_dex};

const V3_POOLS_QUERY: &str = r#"query Pools($first: Int!, $minTvl: BigDecimal!) {
  pools(first: $first, orderBy: totalValueLockedUSD, orderDirection: desc, where: {totalValueLockedUSD_gt: $minTvl}) {
    id
    token0 { symbol }
    token1 { symbol }
    totalValueLockedUSD
    feeTier
    poolDayData(first: 1, orderBy: date, orderDirection: desc) { volumeUSD }
  }
}"#;

const V2_PAIRS_QUERY: &str = r#"query Pairs($first: Int!, $minTvl: BigDecimal!) {
  pairs(first: $first, orderBy: reserveUSD, orderDirection: desc, where: {reserveUSD_gt: $minTvl}) {
    id
    token0 { symbol }
    token1 { symbol }
    reserveUSD
    pairDayDatas(first: 1, orderBy: date, orderDirection: desc) { dailyVolumeUSD }
  }
}"#;

/// Attempts, backoff and per-attempt timeout for indexer calls
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &SourcesConfig) -> Self {
        Self {
            attempts: config.graphql_attempts.max(1),
            backoff: Duration::from_millis(config.graphql_backoff_ms),
            timeout: Duration::from_secs(config.graphql_timeout_secs),
        }
    }

    /// Worst case for a call that exhausts every attempt.
    pub fn deadline(&self) -> Duration {
        self.timeout * self.attempts + self.backoff * self.attempts.saturating_sub(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SourcesConfig::default())
    }
}

#[derive(Debug, Deserialize)]
struct GraphResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphError>,
}

#[derive(Debug, Deserialize)]
struct GraphError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct PoolsData {
    #[serde(default)]
    pools: Vec<SubgraphV3Pool>,
}

#[derive(Debug, Deserialize)]
struct PairsData {
    #[serde(default)]
    pairs: Vec<SubgraphV2Pair>,
}

/// GraphQL indexer for one exchange + version + chain deployment
pub struct SubgraphSource {
    client: Client,
    descriptor: SourceDescriptor,
    endpoint: String,
    first: u32,
    min_tvl_usd: f64,
    policy: RetryPolicy,
}

impl SubgraphSource {
    pub fn new(client: Client, config: &SubgraphConfig, policy: RetryPolicy) -> Self {
        // Descriptors are matched against canonical queries.
        let canonical = SubgraphConfig {
            dex: canonical_dex(&config.dex),
            chain: canonical_chain(&config.chain),
            ..config.clone()
        };
        Self {
            client,
            descriptor: SourceDescriptor {
                name: canonical.name(),
                kind: SourceKind::GraphQl,
                dex: Some(canonical.dex),
                version: Some(config.version),
                chain: Some(canonical.chain),
            },
            endpoint: config.endpoint.clone(),
            first: config.first,
            min_tvl_usd: config.min_tvl_usd,
            policy,
        }
    }

    fn is_concentrated(&self) -> bool {
        self.descriptor.version == Some(PoolVersion::V3)
    }

    fn request_body(&self) -> serde_json::Value {
        let query = if self.is_concentrated() {
            V3_POOLS_QUERY
        } else {
            V2_PAIRS_QUERY
        };
        serde_json::json!({
            "query": query,
            "variables": {
                "first": self.first,
                "minTvl": format!("{}", self.min_tvl_usd),
            }
        })
    }

    async fn request_once(&self) -> Result<RawBatch, SourceError> {
        let provider = self.name();

        let resp = self
            .client
            .post(&self.endpoint)
            .timeout(self.policy.timeout)
            .json(&self.request_body())
            .send()
            .await
            .map_err(|e| SourceError::from_reqwest(provider, e, self.policy.timeout))?;

        if !resp.status().is_success() {
            return Err(SourceError::Status {
                provider: provider.to_string(),
                status: resp.status().as_u16(),
            });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| SourceError::from_reqwest(provider, e, self.policy.timeout))?;

        if self.is_concentrated() {
            let data: PoolsData = Self::decode(provider, &body)?;
            Ok(data.pools.into_iter().map(RawPool::SubgraphV3).collect())
        } else {
            let data: PairsData = Self::decode(provider, &body)?;
            Ok(data.pairs.into_iter().map(RawPool::SubgraphV2).collect())
        }
    }

    fn decode<T: serde::de::DeserializeOwned>(provider: &str, body: &[u8]) -> Result<T, SourceError> {
        let response: GraphResponse<T> =
            serde_json::from_slice(body).map_err(|e| SourceError::Parse {
                provider: provider.to_string(),
                message: e.to_string(),
            })?;

        if !response.errors.is_empty() {
            let message = response
                .errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(SourceError::GraphQl {
                provider: provider.to_string(),
                message,
            });
        }

        response.data.ok_or_else(|| SourceError::Parse {
            provider: provider.to_string(),
            message: "response has no data".to_string(),
        })
    }
}

#[async_trait]
impl PoolSource for SubgraphSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    fn deadline(&self) -> Duration {
        self.policy.deadline()
    }

    async fn fetch(&self, _query: &PoolQuery) -> Result<RawBatch, SourceError> {
        let mut last_error = None;

        for attempt in 1..=self.policy.attempts {
            match self.request_once().await {
                Ok(batch) => {
                    debug!("{}: {} records on attempt {}", self.name(), batch.len(), attempt);
                    return Ok(batch);
                }
                Err(e) => {
                    warn!("{} (attempt {}/{})", e, attempt, self.policy.attempts);
                    last_error = Some(e);
                    if attempt < self.policy.attempts {
                        tokio::time::sleep(self.policy.backoff).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| SourceError::Network {
            provider: self.name().to_string(),
            message: "no attempts made".to_string(),
        }))
    }
}

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{PoolSource, SourceDescriptor, SourceError, SourceKind};
use crate::config::SourcesConfig;
use crate::models::raw::YieldPool;
use crate::models::{PoolQuery, RawBatch, RawPool};

pub const YIELDS_PROVIDER: &str = "defillama";

#[derive(Debug, Deserialize)]
struct YieldsResponse {
    #[serde(default)]
    data: Vec<YieldPool>,
}

/// Cross-dex yields listing. One large unfiltered GET, filtered client-side.
///
/// No retries: a second pull of the full listing costs more than the
/// fallback it would save.
pub struct YieldsSource {
    client: Client,
    descriptor: SourceDescriptor,
    url: String,
    timeout: Duration,
}

impl YieldsSource {
    pub fn new(client: Client, url: &str, timeout: Duration) -> Self {
        Self {
            client,
            descriptor: SourceDescriptor::listing(YIELDS_PROVIDER, SourceKind::Rest),
            url: url.to_string(),
            timeout,
        }
    }

    pub fn from_config(client: Client, config: &SourcesConfig) -> Self {
        Self::new(
            client,
            &config.yields_url,
            Duration::from_secs(config.yields_timeout_secs),
        )
    }
}

#[async_trait]
impl PoolSource for YieldsSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    fn deadline(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, _query: &PoolQuery) -> Result<RawBatch, SourceError> {
        let provider = self.name();

        let resp = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| SourceError::from_reqwest(provider, e, self.timeout))?;

        if !resp.status().is_success() {
            return Err(SourceError::Status {
                provider: provider.to_string(),
                status: resp.status().as_u16(),
            });
        }

        let listing: YieldsResponse = resp
            .json()
            .await
            .map_err(|e| SourceError::from_reqwest(provider, e, self.timeout))?;

        debug!("{}: {} listed pools", provider, listing.data.len());

        Ok(listing.data.into_iter().map(RawPool::Yield).collect())
    }
}

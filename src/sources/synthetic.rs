use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

use super::{PoolSource, SourceDescriptor, SourceError, SourceKind};
use crate::models::raw::YieldPool;
use crate::models::{PoolQuery, RawBatch, RawPool};

pub const SYNTHETIC_PROVIDER: &str = "synthetic";

const SAMPLE_PAIRS: &[&str] = &[
    "WETH-USDC",
    "WBTC-WETH",
    "USDC-USDT",
    "WBNB-BUSD",
    "CAKE-WBNB",
    "LINK-WETH",
    "UNI-WETH",
    "DAI-USDC",
    "ARB-WETH",
    "MATIC-USDC",
];

const SAMPLE_DEXES: &[(&str, &str)] = &[
    ("pancakeswap-v3", "bsc"),
    ("uniswap-v3", "ethereum"),
    ("sushiswap", "ethereum"),
];

/// Last-resort sample generator. Fixed pair/dex layout, random figures.
pub struct SyntheticSource {
    descriptor: SourceDescriptor,
    count: usize,
    seed: Option<u64>,
}

impl SyntheticSource {
    pub fn new(count: usize) -> Self {
        Self {
            descriptor: SourceDescriptor::listing(SYNTHETIC_PROVIDER, SourceKind::Synthetic),
            count: count.max(1),
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn deployments(query: &PoolQuery) -> Vec<(String, String)> {
        if query.is_all_dexes() {
            SAMPLE_DEXES
                .iter()
                .map(|(dex, chain)| {
                    let chain = query.chain.as_deref().unwrap_or(chain);
                    (dex.to_string(), chain.to_string())
                })
                .collect()
        } else {
            let default_chain = if query.dex.contains("pancake") { "bsc" } else { "ethereum" };
            let chain = query.chain.clone().unwrap_or_else(|| default_chain.to_string());
            vec![(query.dex.clone(), chain)]
        }
    }

    pub fn generate(&self, query: &PoolQuery) -> RawBatch {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let deployments = Self::deployments(query);

        (0..self.count)
            .map(|i| {
                let (project, chain) = &deployments[i % deployments.len()];
                let symbol = SAMPLE_PAIRS[i % SAMPLE_PAIRS.len()];
                let tvl: f64 = rng.gen_range(100_000.0..50_000_000.0);
                let turnover: f64 = rng.gen_range(0.01..0.5);
                let apy_base: f64 = rng.gen_range(0.5..40.0);
                let apy_reward: f64 = if rng.gen_bool(0.3) {
                    rng.gen_range(0.0..15.0)
                } else {
                    0.0
                };

                RawPool::Yield(YieldPool {
                    pool: Some(format!("synthetic-{}-{}", project, i)),
                    chain: Some(chain.clone()),
                    project: Some(project.clone()),
                    symbol: Some(symbol.to_string()),
                    pool_meta: None,
                    tvl_usd: Some(tvl),
                    apy: Some(apy_base + apy_reward),
                    apy_base: Some(apy_base),
                    apy_reward: Some(apy_reward),
                    volume_usd1d: Some(tvl * turnover),
                    volume_usd7d: None,
                })
            })
            .collect()
    }
}

#[async_trait]
impl PoolSource for SyntheticSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    fn deadline(&self) -> Duration {
        Duration::from_secs(1)
    }

    async fn fetch(&self, query: &PoolQuery) -> Result<RawBatch, SourceError> {
        Ok(self.generate(query))
    }
}

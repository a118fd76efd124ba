//! Converts provider-shaped records into [`PoolRecord`]s.
//!
//! Each provider shape has its own conversion; they all funnel into one
//! validation step so every accepted record satisfies the same invariants:
//! positive TVL at or above the floor, a usable symbol, and distinct tokens.

use tracing::trace;

use crate::config::AggregatorConfig;
use crate::models::raw::{SubgraphV2Pair, SubgraphV3Pool, YieldPool};
use crate::models::{PoolQuery, PoolRecord, PoolVersion, RawBatch, RawPool, VolumeEstimate};
use crate::sources::SourceDescriptor;

/// Substring pattern → canonical dex name, first match wins.
pub const DEX_ALIASES: &[(&str, &str)] = &[
    ("pancake", "pancakeswap"),
    ("uniswap", "uniswap"),
    ("sushi", "sushiswap"),
    ("curve", "curve"),
    ("balancer", "balancer"),
    ("quickswap", "quickswap"),
    ("trader-joe", "traderjoe"),
    ("traderjoe", "traderjoe"),
    ("velodrome", "velodrome"),
    ("aerodrome", "aerodrome"),
    ("camelot", "camelot"),
    ("biswap", "biswap"),
    ("thena", "thena"),
];

/// Exact provider chain name → canonical chain id.
pub const CHAIN_ALIASES: &[(&str, &str)] = &[
    ("binance", "bsc"),
    ("bsc", "bsc"),
    ("bnb", "bsc"),
    ("bnb chain", "bsc"),
    ("ethereum", "ethereum"),
    ("eth", "ethereum"),
    ("mainnet", "ethereum"),
    ("polygon", "polygon"),
    ("matic", "polygon"),
    ("arbitrum", "arbitrum"),
    ("arbitrum one", "arbitrum"),
    ("optimism", "optimism"),
    ("op mainnet", "optimism"),
    ("avalanche", "avalanche"),
    ("avax", "avalanche"),
    ("base", "base"),
];

/// Fee fraction per (dex, version); `None` matches any version.
pub const FEE_TIERS: &[(&str, Option<PoolVersion>, f64)] = &[
    ("pancakeswap", Some(PoolVersion::V2), 0.0025),
    ("pancakeswap", Some(PoolVersion::V3), 0.0025),
    ("uniswap", None, 0.003),
    ("sushiswap", None, 0.003),
    ("curve", None, 0.0004),
    ("balancer", None, 0.002),
    ("biswap", None, 0.001),
];

pub const DEFAULT_FEE_TIER: f64 = 0.003;

const UNKNOWN: &str = "unknown";

pub fn canonical_dex(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    DEX_ALIASES
        .iter()
        .find(|(pattern, _)| lower.contains(pattern))
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(lower)
}

pub fn canonical_chain(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    CHAIN_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(lower)
}

pub fn default_fee_tier(dex: &str, version: PoolVersion) -> f64 {
    FEE_TIERS
        .iter()
        .find(|(name, v, _)| *name == dex && v.map_or(true, |v| v == version))
        .map(|(_, _, fee)| *fee)
        .unwrap_or(DEFAULT_FEE_TIER)
}

/// De-alias the dex and chain of a request so equivalent spellings share a cache key.
pub fn canonical_query(query: &PoolQuery) -> PoolQuery {
    PoolQuery {
        dex: if query.is_all_dexes() {
            query.dex.clone()
        } else {
            canonical_dex(&query.dex)
        },
        chain: query.chain.as_deref().map(canonical_chain),
    }
}

/// Split `A-B` or `A/B` at the first delimiter. No delimiter: the whole symbol is token0.
pub fn split_symbol(symbol: &str) -> Option<(String, String)> {
    let symbol = symbol.trim();
    if symbol.is_empty() {
        return None;
    }

    match symbol.find(|c| c == '-' || c == '/') {
        Some(idx) => {
            let token0 = symbol[..idx].trim();
            let token1 = symbol[idx + 1..].trim();
            if token0.is_empty() {
                return None;
            }
            Some((token0.to_string(), token1.to_string()))
        }
        None => Some((symbol.to_string(), String::new())),
    }
}

/// Fee from a free-form note such as `0.05%`.
fn fee_from_meta(meta: &str) -> Option<f64> {
    meta.split_whitespace()
        .filter_map(|word| word.strip_suffix('%'))
        .filter_map(|n| n.parse::<f64>().ok())
        .map(|pct| pct / 100.0)
        .find(|fee| *fee > 0.0 && *fee < 0.1)
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Rejection {
    #[error("missing or non-positive TVL")]
    MissingTvl,

    #[error("TVL {tvl} below floor {floor}")]
    BelowTvlFloor { tvl: f64, floor: f64 },

    #[error("no usable symbol")]
    MissingSymbol,

    #[error("degenerate pair {0}/{0}")]
    DegeneratePair(String),
}

/// Provider-independent fields gathered before validation
struct Candidate {
    id: Option<String>,
    token0: Option<String>,
    token1: Option<String>,
    dex: String,
    version: PoolVersion,
    chain: String,
    tvl: Option<f64>,
    volume_24h: Option<f64>,
    volume_7d: Option<f64>,
    fee_tier: Option<f64>,
    apy_total: Option<f64>,
    apy_base: Option<f64>,
    apy_reward: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalizer {
    min_tvl_usd: f64,
    volume_heuristic: f64,
}

impl Normalizer {
    pub fn new(min_tvl_usd: f64, volume_heuristic: f64) -> Self {
        Self {
            min_tvl_usd,
            volume_heuristic,
        }
    }

    pub fn from_config(config: &AggregatorConfig) -> Self {
        Self::new(config.min_tvl_usd, config.volume_heuristic)
    }

    pub fn without_floor(self) -> Self {
        Self {
            min_tvl_usd: 0.0,
            ..self
        }
    }

    pub fn normalize(
        &self,
        raw: &RawPool,
        descriptor: &SourceDescriptor,
    ) -> Result<PoolRecord, Rejection> {
        let candidate = match raw {
            RawPool::SubgraphV3(pool) => Self::from_v3(pool, descriptor),
            RawPool::SubgraphV2(pair) => Self::from_v2(pair, descriptor),
            RawPool::Yield(pool) => Self::from_yield(pool),
        };
        self.build(candidate, &descriptor.name)
    }

    /// Normalize a whole batch, silently dropping rejected records.
    pub fn normalize_batch(&self, batch: &RawBatch, descriptor: &SourceDescriptor) -> Vec<PoolRecord> {
        batch
            .records
            .iter()
            .filter_map(|raw| match self.normalize(raw, descriptor) {
                Ok(record) => Some(record),
                Err(reason) => {
                    trace!("{}: dropped record: {}", descriptor.name, reason);
                    None
                }
            })
            .collect()
    }

    /// Daily volume with the method used: reported → 7d / 7 → TVL heuristic.
    pub fn estimate_volume(
        &self,
        volume_24h: Option<f64>,
        volume_7d: Option<f64>,
        tvl: f64,
    ) -> (f64, VolumeEstimate) {
        if let Some(v) = finite(volume_24h).filter(|v| *v >= 0.0) {
            return (v, VolumeEstimate::Reported);
        }
        if let Some(v) = finite(volume_7d).filter(|v| *v >= 0.0) {
            return (v / 7.0, VolumeEstimate::SevenDayAverage);
        }
        (tvl * self.volume_heuristic, VolumeEstimate::TvlHeuristic)
    }

    fn descriptor_fields(descriptor: &SourceDescriptor) -> (String, PoolVersion, String) {
        (
            descriptor
                .dex
                .as_deref()
                .map(canonical_dex)
                .unwrap_or_else(|| UNKNOWN.to_string()),
            descriptor.version.unwrap_or_default(),
            descriptor
                .chain
                .as_deref()
                .map(canonical_chain)
                .unwrap_or_else(|| UNKNOWN.to_string()),
        )
    }

    fn from_v3(pool: &SubgraphV3Pool, descriptor: &SourceDescriptor) -> Candidate {
        let (dex, version, chain) = Self::descriptor_fields(descriptor);
        Candidate {
            id: pool.id.clone(),
            token0: pool.token0.as_ref().and_then(|t| t.symbol.clone()),
            token1: pool.token1.as_ref().and_then(|t| t.symbol.clone()),
            dex,
            version,
            chain,
            tvl: pool.total_value_locked_usd,
            volume_24h: pool.pool_day_data.first().and_then(|d| d.volume_usd),
            volume_7d: None,
            fee_tier: finite(pool.fee_tier)
                .filter(|ppm| *ppm > 0.0)
                .map(|ppm| ppm / 1_000_000.0),
            apy_total: None,
            apy_base: None,
            apy_reward: None,
        }
    }

    fn from_v2(pair: &SubgraphV2Pair, descriptor: &SourceDescriptor) -> Candidate {
        let (dex, version, chain) = Self::descriptor_fields(descriptor);
        Candidate {
            id: pair.id.clone(),
            token0: pair.token0.as_ref().and_then(|t| t.symbol.clone()),
            token1: pair.token1.as_ref().and_then(|t| t.symbol.clone()),
            dex,
            version,
            chain,
            tvl: pair.reserve_usd,
            volume_24h: pair.pair_day_datas.first().and_then(|d| d.daily_volume_usd),
            volume_7d: None,
            fee_tier: None,
            apy_total: None,
            apy_base: None,
            apy_reward: None,
        }
    }

    fn from_yield(pool: &YieldPool) -> Candidate {
        let project = pool.project.as_deref().unwrap_or(UNKNOWN);
        let (token0, token1) = match pool.symbol.as_deref().and_then(split_symbol) {
            Some((t0, t1)) => (Some(t0), Some(t1)),
            None => (None, None),
        };

        Candidate {
            id: pool.pool.clone(),
            token0,
            token1,
            dex: canonical_dex(project),
            version: PoolVersion::infer(project),
            chain: canonical_chain(pool.chain.as_deref().unwrap_or(UNKNOWN)),
            tvl: pool.tvl_usd,
            volume_24h: pool.volume_usd1d,
            volume_7d: pool.volume_usd7d,
            fee_tier: pool.pool_meta.as_deref().and_then(fee_from_meta),
            apy_total: pool.apy,
            apy_base: pool.apy_base,
            apy_reward: pool.apy_reward,
        }
    }

    fn build(&self, c: Candidate, source_tag: &str) -> Result<PoolRecord, Rejection> {
        let tvl = finite(c.tvl).filter(|tvl| *tvl > 0.0).ok_or(Rejection::MissingTvl)?;
        if tvl < self.min_tvl_usd {
            return Err(Rejection::BelowTvlFloor {
                tvl,
                floor: self.min_tvl_usd,
            });
        }

        let token0 = c
            .token0
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or(Rejection::MissingSymbol)?;
        let token1 = c.token1.map(|s| s.trim().to_string()).unwrap_or_default();
        if token0.eq_ignore_ascii_case(&token1) {
            return Err(Rejection::DegeneratePair(token0));
        }

        let pair_label = if token1.is_empty() {
            token0.clone()
        } else {
            format!("{}/{}", token0, token1)
        };

        let (volume_24h_usd, volume_estimate) = self.estimate_volume(c.volume_24h, c.volume_7d, tvl);
        let fee_tier_fraction = c
            .fee_tier
            .unwrap_or_else(|| default_fee_tier(&c.dex, c.version));

        let apy_base = finite(c.apy_base).unwrap_or(0.0);
        let apy_reward = finite(c.apy_reward).unwrap_or(0.0);
        let apy_total = finite(c.apy_total).unwrap_or(apy_base + apy_reward);

        let id = c
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| PoolRecord::synthesize_id(&c.dex, &c.chain, &token0, &token1));

        Ok(PoolRecord {
            id,
            pair_label,
            dex: c.dex,
            version: c.version,
            chain: c.chain,
            token0,
            token1,
            total_value_locked_usd: tvl,
            volume_24h_usd,
            volume_estimate,
            fee_tier_fraction,
            provider_apy_total: apy_total,
            provider_apy_base: apy_base,
            provider_apy_reward: apy_reward,
            source_tag: source_tag.to_string(),
        })
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::from_config(&AggregatorConfig::default())
    }
}

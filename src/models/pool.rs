use serde::{Deserialize, Serialize};
use std::fmt;

/// AMM generation of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolVersion {
    V1,
    V2,
    V3,
}

impl PoolVersion {
    /// Infer from a provider project id such as `uniswap-v3`, defaulting to V2.
    pub fn infer(project: &str) -> Self {
        let project = project.to_ascii_lowercase();
        if project.contains("v3") {
            PoolVersion::V3
        } else if project.contains("v2") {
            PoolVersion::V2
        } else if project.contains("v1") {
            PoolVersion::V1
        } else {
            PoolVersion::V2
        }
    }
}

impl Default for PoolVersion {
    fn default() -> Self {
        PoolVersion::V2
    }
}

impl fmt::Display for PoolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolVersion::V1 => write!(f, "V1"),
            PoolVersion::V2 => write!(f, "V2"),
            PoolVersion::V3 => write!(f, "V3"),
        }
    }
}

/// How `volume_24h_usd` was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VolumeEstimate {
    /// Provider reported a 24h figure directly
    Reported,
    /// 7-day volume divided by seven
    SevenDayAverage,
    /// TVL multiplied by the configured heuristic constant
    TvlHeuristic,
}

/// Canonical, source-agnostic pool record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolRecord {
    pub id: String,
    pub pair_label: String,
    pub dex: String,
    pub version: PoolVersion,
    pub chain: String,
    pub token0: String,
    pub token1: String,
    pub total_value_locked_usd: f64,
    pub volume_24h_usd: f64,
    pub volume_estimate: VolumeEstimate,
    pub fee_tier_fraction: f64,
    pub provider_apy_total: f64,
    pub provider_apy_base: f64,
    pub provider_apy_reward: f64,
    pub source_tag: String,
}

impl PoolRecord {
    /// Identifier used when a provider has none: `dex-chain-token0-token1`.
    pub fn synthesize_id(dex: &str, chain: &str, token0: &str, token1: &str) -> String {
        format!("{}-{}-{}-{}", dex, chain, token0, token1).to_lowercase()
    }

    /// Key under which records from different providers are considered the same pool.
    pub fn merge_key(&self) -> (String, String, String) {
        (
            self.chain.clone(),
            self.dex.clone(),
            self.pair_label.to_uppercase(),
        )
    }
}

/// Figures derived from a [`PoolRecord`] by the metric calculator.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolMetrics {
    pub fees_24h_usd: f64,
    pub fee_apr: f64,
    pub apr: f64,
    pub total_apr: f64,
}

/// A record with its metrics attached; serialised flat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolWithMetrics {
    #[serde(flatten)]
    pub pool: PoolRecord,
    #[serde(flatten)]
    pub metrics: PoolMetrics,
}

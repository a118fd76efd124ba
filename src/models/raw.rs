//! Provider-shaped records, exactly as upstream services return them.
//!
//! Indexers encode decimals as strings while the yields API uses JSON numbers;
//! both are accepted for every numeric field.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubgraphToken {
    pub symbol: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubgraphPoolDay {
    #[serde(rename = "volumeUSD", default, deserialize_with = "lenient_f64")]
    pub volume_usd: Option<f64>,
}

/// A concentrated-liquidity pool from a V3 indexer
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubgraphV3Pool {
    pub id: Option<String>,
    pub token0: Option<SubgraphToken>,
    pub token1: Option<SubgraphToken>,
    #[serde(rename = "totalValueLockedUSD", default, deserialize_with = "lenient_f64")]
    pub total_value_locked_usd: Option<f64>,
    /// Fee in parts per million (`3000` = 0.3%)
    #[serde(default, deserialize_with = "lenient_f64")]
    pub fee_tier: Option<f64>,
    #[serde(default)]
    pub pool_day_data: Vec<SubgraphPoolDay>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubgraphPairDay {
    #[serde(rename = "dailyVolumeUSD", default, deserialize_with = "lenient_f64")]
    pub daily_volume_usd: Option<f64>,
}

/// A constant-product pair from a V2 indexer
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubgraphV2Pair {
    pub id: Option<String>,
    pub token0: Option<SubgraphToken>,
    pub token1: Option<SubgraphToken>,
    #[serde(rename = "reserveUSD", default, deserialize_with = "lenient_f64")]
    pub reserve_usd: Option<f64>,
    #[serde(default)]
    pub pair_day_datas: Vec<SubgraphPairDay>,
}

/// One entry of the cross-dex yields listing
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YieldPool {
    pub pool: Option<String>,
    pub chain: Option<String>,
    pub project: Option<String>,
    pub symbol: Option<String>,
    /// Free-form notes; for concentrated pools usually the fee, e.g. `0.05%`
    pub pool_meta: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub tvl_usd: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub apy: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub apy_base: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub apy_reward: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub volume_usd1d: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub volume_usd7d: Option<f64>,
}

/// One raw record tagged with the provider shape it came in.
#[derive(Debug, Clone)]
pub enum RawPool {
    SubgraphV3(SubgraphV3Pool),
    SubgraphV2(SubgraphV2Pair),
    Yield(YieldPool),
}

/// Everything one successful source call returned.
#[derive(Debug, Clone, Default)]
pub struct RawBatch {
    pub records: Vec<RawPool>,
}

impl RawBatch {
    pub fn new(records: Vec<RawPool>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<RawPool> for RawBatch {
    fn from_iter<I: IntoIterator<Item = RawPool>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }))
}

use crate::models::{PoolMetrics, PoolRecord, PoolWithMetrics};

const DAYS_PER_YEAR: f64 = 365.0;

/// Fee revenue and annualised return for one record. Pure and deterministic.
///
/// A positive provider APY takes precedence over the fee APR computed here;
/// reward APY is added on top of whichever wins.
pub fn compute(pool: &PoolRecord) -> PoolMetrics {
    let tvl = pool.total_value_locked_usd;
    let fees_24h_usd = non_negative(pool.volume_24h_usd * pool.fee_tier_fraction);

    let fee_apr = if tvl > 0.0 && tvl.is_finite() {
        non_negative(fees_24h_usd * DAYS_PER_YEAR / tvl * 100.0)
    } else {
        0.0
    };

    let apr = if pool.provider_apy_total.is_finite() && pool.provider_apy_total > 0.0 {
        pool.provider_apy_total
    } else {
        fee_apr
    };

    let reward = if pool.provider_apy_reward.is_finite() {
        pool.provider_apy_reward
    } else {
        0.0
    };

    PoolMetrics {
        fees_24h_usd,
        fee_apr,
        apr,
        total_apr: apr + reward,
    }
}

pub fn attach(pool: PoolRecord) -> PoolWithMetrics {
    let metrics = compute(&pool);
    PoolWithMetrics { pool, metrics }
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

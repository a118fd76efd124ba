use serde::{Deserialize, Serialize};
use std::fmt;

/// Dex filter value selecting every provider
pub const ALL: &str = "all";

/// Effective query for one aggregation: which dex, which chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolQuery {
    pub dex: String,
    pub chain: Option<String>,
}

impl PoolQuery {
    /// Build a query from raw request input. Blank or `all` chains mean no chain filter.
    pub fn new(dex: &str, chain: Option<&str>) -> Self {
        let dex = dex.trim().to_lowercase();
        let dex = if dex.is_empty() { ALL.to_string() } else { dex };
        let chain = chain
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty() && c != ALL);

        Self { dex, chain }
    }

    pub fn all() -> Self {
        Self::new(ALL, None)
    }

    pub fn is_all_dexes(&self) -> bool {
        self.dex == ALL
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey {
            dex: self.dex.clone(),
            chain: self.chain.clone().unwrap_or_else(|| ALL.to_string()),
        }
    }
}

impl fmt::Display for PoolQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.chain {
            Some(chain) => write!(f, "{}@{}", self.dex, chain),
            None => write!(f, "{}", self.dex),
        }
    }
}

/// Cache key: `(dexFilter, chainFilter)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub dex: String,
    pub chain: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_normalizes_input() {
        let query = PoolQuery::new(" PancakeSwap ", Some("BSC"));
        assert_eq!(query.dex, "pancakeswap");
        assert_eq!(query.chain.as_deref(), Some("bsc"));
    }

    #[test]
    fn test_blank_and_all_chain_mean_no_filter() {
        assert_eq!(PoolQuery::new("all", Some("")).chain, None);
        assert_eq!(PoolQuery::new("all", Some("ALL")).chain, None);
        assert_eq!(PoolQuery::new("", None).dex, ALL);
    }

    #[test]
    fn test_cache_key_distinguishes_chain() {
        let a = PoolQuery::new("uniswap", None).cache_key();
        let b = PoolQuery::new("uniswap", Some("arbitrum")).cache_key();
        assert_ne!(a, b);
        assert_eq!(a.chain, "all");
    }
}

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::models::PoolVersion;

/// Environment variable overriding the config file location
pub const CONFIG_PATH_ENV: &str = "POOL_AGGREGATOR_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AggregatorConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Records with less TVL than this are rejected by the normalizer
    #[serde(default = "default_min_tvl_usd")]
    pub min_tvl_usd: f64,
    /// Fraction of TVL assumed as daily volume when no volume is reported
    #[serde(default = "default_volume_heuristic")]
    pub volume_heuristic: f64,
    #[serde(default = "default_synthetic_count")]
    pub synthetic_count: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourcesConfig {
    #[serde(default = "default_graphql_timeout_secs")]
    pub graphql_timeout_secs: u64,
    #[serde(default = "default_graphql_attempts")]
    pub graphql_attempts: u32,
    #[serde(default = "default_graphql_backoff_ms")]
    pub graphql_backoff_ms: u64,
    #[serde(default = "default_yields_url")]
    pub yields_url: String,
    #[serde(default = "default_yields_timeout_secs")]
    pub yields_timeout_secs: u64,
    /// Use the yields listing to enrich indexer records with APY figures
    #[serde(default = "default_enrichment")]
    pub enrichment: bool,
    #[serde(default = "default_subgraphs")]
    pub subgraphs: Vec<SubgraphConfig>,
}

/// One indexer endpoint: a single exchange + version + chain
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SubgraphConfig {
    pub dex: String,
    pub version: PoolVersion,
    pub chain: String,
    pub endpoint: String,
    #[serde(default = "default_subgraph_min_tvl")]
    pub min_tvl_usd: f64,
    #[serde(default = "default_subgraph_first")]
    pub first: u32,
}

impl SubgraphConfig {
    /// Provider name, e.g. `pancakeswap-v3-bsc`
    pub fn name(&self) -> String {
        format!(
            "{}-{}-{}",
            self.dex,
            self.version.to_string().to_lowercase(),
            self.chain
        )
    }
}

fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 3000 }
fn default_ttl_seconds() -> u64 { 300 }
fn default_max_results() -> usize { 500 }
fn default_min_tvl_usd() -> f64 { 10_000.0 }
fn default_volume_heuristic() -> f64 { 0.05 }
fn default_synthetic_count() -> usize { 20 }
fn default_graphql_timeout_secs() -> u64 { 15 }
fn default_graphql_attempts() -> u32 { 3 }
fn default_graphql_backoff_ms() -> u64 { 1_000 }
fn default_yields_url() -> String { "https://yields.llama.fi/pools".to_string() }
fn default_yields_timeout_secs() -> u64 { 30 }
fn default_enrichment() -> bool { true }
fn default_subgraph_min_tvl() -> f64 { 50_000.0 }
fn default_subgraph_first() -> u32 { 100 }

fn subgraph(dex: &str, version: PoolVersion, chain: &str, endpoint: &str, min_tvl_usd: f64) -> SubgraphConfig {
    SubgraphConfig {
        dex: dex.to_string(),
        version,
        chain: chain.to_string(),
        endpoint: endpoint.to_string(),
        min_tvl_usd,
        first: default_subgraph_first(),
    }
}

fn default_subgraphs() -> Vec<SubgraphConfig> {
    const GRAPH: &str = "https://api.thegraph.com/subgraphs/name";
    vec![
        subgraph("pancakeswap", PoolVersion::V3, "bsc", &format!("{GRAPH}/pancakeswap/exchange-v3-bsc"), 50_000.0),
        subgraph("pancakeswap", PoolVersion::V3, "ethereum", &format!("{GRAPH}/pancakeswap/exchange-v3-eth"), 50_000.0),
        subgraph("pancakeswap", PoolVersion::V2, "bsc", &format!("{GRAPH}/pancakeswap/exchange-v2"), 50_000.0),
        subgraph("uniswap", PoolVersion::V3, "ethereum", &format!("{GRAPH}/uniswap/uniswap-v3"), 100_000.0),
        subgraph("uniswap", PoolVersion::V3, "arbitrum", &format!("{GRAPH}/ianlapham/uniswap-arbitrum-one"), 100_000.0),
        subgraph("uniswap", PoolVersion::V3, "polygon", &format!("{GRAPH}/ianlapham/uniswap-v3-polygon"), 100_000.0),
        subgraph("uniswap", PoolVersion::V2, "ethereum", &format!("{GRAPH}/uniswap/uniswap-v2"), 100_000.0),
        subgraph("sushiswap", PoolVersion::V2, "ethereum", &format!("{GRAPH}/sushiswap/exchange"), 50_000.0),
    ]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl_seconds(),
        }
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            min_tvl_usd: default_min_tvl_usd(),
            volume_heuristic: default_volume_heuristic(),
            synthetic_count: default_synthetic_count(),
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            graphql_timeout_secs: default_graphql_timeout_secs(),
            graphql_attempts: default_graphql_attempts(),
            graphql_backoff_ms: default_graphql_backoff_ms(),
            yields_url: default_yields_url(),
            yields_timeout_secs: default_yields_timeout_secs(),
            enrichment: default_enrichment(),
            subgraphs: default_subgraphs(),
        }
    }
}

impl Config {
    /// Load from `$POOL_AGGREGATOR_CONFIG` or `config.toml`. A missing file yields defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let path = Path::new(&path);

        if !path.exists() {
            tracing::warn!("{} not found, using built-in defaults", path.display());
            let config = Config::default();
            config.validate()?;
            return Ok(config);
        }

        Self::from_path(path)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.aggregator.max_results == 0 {
            return Err(ConfigError::Invalid("aggregator.max_results must be > 0".into()));
        }
        if !(self.aggregator.volume_heuristic > 0.0 && self.aggregator.volume_heuristic.is_finite()) {
            return Err(ConfigError::Invalid("aggregator.volume_heuristic must be positive".into()));
        }
        if self.aggregator.min_tvl_usd < 0.0 {
            return Err(ConfigError::Invalid("aggregator.min_tvl_usd must not be negative".into()));
        }
        if self.sources.graphql_attempts == 0 {
            return Err(ConfigError::Invalid("sources.graphql_attempts must be >= 1".into()));
        }
        if self.cache.ttl_seconds == 0 {
            return Err(ConfigError::Invalid("cache.ttl_seconds must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.cache.ttl_seconds, 300);
        assert_eq!(config.aggregator.max_results, 500);
        assert_eq!(config.aggregator.volume_heuristic, 0.05);
        assert_eq!(config.sources.graphql_attempts, 3);
        assert!(!config.sources.subgraphs.is_empty());
    }

    #[test]
    fn test_partial_file_overrides() {
        let config = Config::parse(
            r#"
            [aggregator]
            max_results = 100
            volume_heuristic = 0.1

            [[sources.subgraphs]]
            dex = "uniswap"
            version = "V3"
            chain = "base"
            endpoint = "http://localhost/uniswap-base"
            "#,
        )
        .unwrap();

        assert_eq!(config.aggregator.max_results, 100);
        assert_eq!(config.aggregator.volume_heuristic, 0.1);
        assert_eq!(config.aggregator.min_tvl_usd, 10_000.0);
        assert_eq!(config.sources.subgraphs.len(), 1);
        assert_eq!(config.sources.subgraphs[0].name(), "uniswap-v3-base");
        assert_eq!(config.sources.subgraphs[0].first, 100);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(matches!(
            Config::parse("[aggregator]\nmax_results = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::parse("[aggregator]\nvolume_heuristic = -1.0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::parse("[sources]\ngraphql_attempts = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(Config::parse("not toml ="), Err(ConfigError::Parse(_))));
    }
}

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::metrics;
use super::normalizer::{canonical_query, Normalizer};
use crate::config::{AggregatorConfig, Config};
use crate::models::{
    AggregationResult, PoolQuery, PoolRecord, PoolWithMetrics, ProviderOutcome, RawBatch,
    ResultSource,
};
use crate::sources::subgraph::RetryPolicy;
use crate::sources::{
    PoolSource, SourceError, SubgraphSource, SyntheticSource, YieldsSource,
};

/// Ways of producing a result, tried in order until one yields records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    MultiSource,
    RestFallback,
    Synthetic,
}

impl Strategy {
    pub const ORDER: [Strategy; 3] = [
        Strategy::MultiSource,
        Strategy::RestFallback,
        Strategy::Synthetic,
    ];

    pub fn result_source(self) -> ResultSource {
        match self {
            Strategy::MultiSource => ResultSource::Primary,
            Strategy::RestFallback => ResultSource::Fallback,
            Strategy::Synthetic => ResultSource::Synthetic,
        }
    }
}

/// Result of one strategy attempt
#[derive(Debug, Clone)]
pub enum StrategyOutcome {
    Found {
        pools: Vec<PoolWithMetrics>,
        providers: Vec<ProviderOutcome>,
    },
    Empty {
        providers: Vec<ProviderOutcome>,
    },
}

impl StrategyOutcome {
    fn from_pools(pools: Vec<PoolWithMetrics>, providers: Vec<ProviderOutcome>) -> Self {
        if pools.is_empty() {
            StrategyOutcome::Empty { providers }
        } else {
            StrategyOutcome::Found { pools, providers }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct EnrichmentApy {
    total: f64,
    base: f64,
    reward: f64,
}

/// Yield figures from the enrichment source, indexed two ways
#[derive(Default)]
struct EnrichmentIndex {
    by_pair: HashMap<(String, String, String), EnrichmentApy>,
    by_tokens: HashMap<(String, String, String, String), EnrichmentApy>,
}

impl EnrichmentIndex {
    fn build(records: &[PoolRecord]) -> Self {
        let mut index = Self::default();
        for record in records {
            let apy = EnrichmentApy {
                total: record.provider_apy_total,
                base: record.provider_apy_base,
                reward: record.provider_apy_reward,
            };
            if !apy.total.is_finite() || apy.total <= 0.0 {
                continue;
            }
            Self::keep_best(index.by_pair.entry(Self::pair_key(record)).or_insert(apy), apy);
            Self::keep_best(index.by_tokens.entry(Self::token_key(record)).or_insert(apy), apy);
        }
        index
    }

    fn keep_best(slot: &mut EnrichmentApy, candidate: EnrichmentApy) {
        if candidate.total > slot.total {
            *slot = candidate;
        }
    }

    fn pair_key(record: &PoolRecord) -> (String, String, String) {
        (
            record.chain.clone(),
            record.pair_label.to_uppercase(),
            record.dex.clone(),
        )
    }

    fn token_key(record: &PoolRecord) -> (String, String, String, String) {
        (
            record.chain.clone(),
            record.token0.to_uppercase(),
            record.token1.to_uppercase(),
            record.dex.clone(),
        )
    }

    fn lookup(&self, record: &PoolRecord) -> Option<EnrichmentApy> {
        self.by_pair
            .get(&Self::pair_key(record))
            .or_else(|| self.by_tokens.get(&Self::token_key(record)))
            .copied()
    }

    fn is_empty(&self) -> bool {
        self.by_pair.is_empty()
    }

    /// Adopt the enrichment APY only where it beats the record's current APR.
    fn apply(&self, record: &mut PoolRecord) -> bool {
        let Some(apy) = self.lookup(record) else {
            return false;
        };
        if apy.total > metrics::compute(record).apr {
            record.provider_apy_total = apy.total;
            record.provider_apy_base = apy.base;
            record.provider_apy_reward = apy.reward;
            true
        } else {
            false
        }
    }
}

/// Fans out to every matching source, merges, ranks, and falls back.
pub struct PoolAggregator {
    sources: Vec<Arc<dyn PoolSource>>,
    fallback: Option<Arc<dyn PoolSource>>,
    enrichment: Option<Arc<dyn PoolSource>>,
    synthetic: Arc<dyn PoolSource>,
    normalizer: Normalizer,
    max_results: usize,
}

impl PoolAggregator {
    pub fn new(sources: Vec<Arc<dyn PoolSource>>, normalizer: Normalizer, max_results: usize) -> Self {
        Self {
            sources,
            fallback: None,
            enrichment: None,
            synthetic: Arc::new(SyntheticSource::new(AggregatorConfig::default().synthetic_count)),
            normalizer,
            max_results: max_results.max(1),
        }
    }

    pub fn with_fallback(mut self, source: Arc<dyn PoolSource>) -> Self {
        self.fallback = Some(source);
        self
    }

    pub fn with_enrichment(mut self, source: Arc<dyn PoolSource>) -> Self {
        self.enrichment = Some(source);
        self
    }

    pub fn with_synthetic(mut self, source: Arc<dyn PoolSource>) -> Self {
        self.synthetic = source;
        self
    }

    /// Wire every configured source around one shared HTTP client.
    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        let client = crate::sources::http_client()?;
        let policy = RetryPolicy::from_config(&config.sources);

        let sources: Vec<Arc<dyn PoolSource>> = config
            .sources
            .subgraphs
            .iter()
            .map(|sg| Arc::new(SubgraphSource::new(client.clone(), sg, policy)) as Arc<dyn PoolSource>)
            .collect();

        let yields: Arc<dyn PoolSource> = Arc::new(YieldsSource::from_config(client, &config.sources));

        let mut aggregator = Self::new(
            sources,
            Normalizer::from_config(&config.aggregator),
            config.aggregator.max_results,
        )
        .with_fallback(yields.clone())
        .with_synthetic(Arc::new(SyntheticSource::new(config.aggregator.synthetic_count)));

        if config.sources.enrichment {
            aggregator = aggregator.with_enrichment(yields);
        }

        info!(
            "✓ Aggregator ready: {} indexers, enrichment {}",
            aggregator.sources.len(),
            if config.sources.enrichment { "on" } else { "off" }
        );
        Ok(aggregator)
    }

    pub fn max_results(&self) -> usize {
        self.max_results
    }

    /// Indexers that can contribute to `query`, in registration order.
    pub fn select_sources(&self, query: &PoolQuery) -> Vec<Arc<dyn PoolSource>> {
        let query = canonical_query(query);
        self.sources
            .iter()
            .filter(|s| s.descriptor().matches(&query))
            .cloned()
            .collect()
    }

    /// Never fails: total upstream failure ends in the synthetic strategy.
    pub async fn aggregate(&self, query: &PoolQuery) -> AggregationResult {
        let started = Instant::now();
        let query = canonical_query(query);
        let mut providers = Vec::new();
        let mut listing = None;

        for strategy in Strategy::ORDER {
            let outcome = match strategy {
                Strategy::MultiSource => {
                    let (outcome, fetched) = self.multi_source(&query).await;
                    listing = fetched;
                    outcome
                }
                Strategy::RestFallback => self.rest_fallback(&query, listing.take()).await,
                Strategy::Synthetic => self.attempt(strategy, &query).await,
            };

            match outcome {
                StrategyOutcome::Found { pools, providers: outcomes } => {
                    providers.extend(outcomes);
                    info!(
                        "Aggregated {} pools for {} via {:?} in {}ms",
                        pools.len(),
                        query,
                        strategy,
                        started.elapsed().as_millis()
                    );
                    return AggregationResult::new(pools, strategy.result_source(), providers);
                }
                StrategyOutcome::Empty { providers: outcomes } => {
                    providers.extend(outcomes);
                    warn!("{:?} produced no pools for {}", strategy, query);
                }
            }
        }

        AggregationResult::new(Vec::new(), ResultSource::Synthetic, providers)
    }

    /// Run a single strategy in isolation.
    pub async fn attempt(&self, strategy: Strategy, query: &PoolQuery) -> StrategyOutcome {
        match strategy {
            Strategy::MultiSource => self.multi_source(query).await.0,
            Strategy::RestFallback => self.rest_fallback(query, None).await,
            Strategy::Synthetic => {
                // Sample data is never held to the live TVL floor.
                self.single_source(&self.synthetic, query, self.normalizer.without_floor())
                    .await
            }
        }
    }

    /// Indexer fan-out. Also hands back the enrichment listing when it is the
    /// same provider as the REST fallback, so a fallback never downloads it twice.
    async fn multi_source(&self, query: &PoolQuery) -> (StrategyOutcome, Option<RawBatch>) {
        let selected = self.select_sources(query);
        if selected.is_empty() {
            debug!("No indexers registered for {}", query);
            return (StrategyOutcome::Empty { providers: Vec::new() }, None);
        }

        let primaries = join_all(selected.iter().map(|s| fetch_bounded(s.as_ref(), query)));
        let enrichment = async {
            match &self.enrichment {
                Some(source) => Some(fetch_bounded(source.as_ref(), query).await),
                None => None,
            }
        };
        let (results, enrichment) = tokio::join!(primaries, enrichment);

        let mut providers = Vec::with_capacity(results.len() + 1);
        let mut records = Vec::new();
        for (source, result) in selected.iter().zip(results) {
            records.extend(self.collect(source.as_ref(), &result, query, self.normalizer, &mut providers));
        }

        let mut listing = None;
        if let (Some(source), Some(result)) = (&self.enrichment, enrichment) {
            let listed = self.collect(source.as_ref(), &result, &PoolQuery::all(), self.normalizer, &mut providers);
            let index = EnrichmentIndex::build(&listed);
            if !index.is_empty() {
                let enriched = records
                    .iter_mut()
                    .map(|r| index.apply(r))
                    .filter(|applied| *applied)
                    .count();
                debug!("Enrichment raised APY on {} of {} pools", enriched, records.len());
            }
            if self.fallback.as_ref().is_some_and(|f| f.name() == source.name()) {
                listing = result.ok();
            }
        }

        (StrategyOutcome::from_pools(self.rank(records), providers), listing)
    }

    async fn rest_fallback(&self, query: &PoolQuery, listing: Option<RawBatch>) -> StrategyOutcome {
        let Some(source) = &self.fallback else {
            return StrategyOutcome::Empty { providers: Vec::new() };
        };
        let result = match listing {
            Some(batch) => {
                debug!("Reusing {} listing fetched for enrichment", source.name());
                Ok(batch)
            }
            None => fetch_bounded(source.as_ref(), query).await,
        };
        let mut providers = Vec::with_capacity(1);
        let records = self.collect(source.as_ref(), &result, query, self.normalizer, &mut providers);
        StrategyOutcome::from_pools(self.rank(records), providers)
    }

    async fn single_source(
        &self,
        source: &Arc<dyn PoolSource>,
        query: &PoolQuery,
        normalizer: Normalizer,
    ) -> StrategyOutcome {
        let result = fetch_bounded(source.as_ref(), query).await;
        let mut providers = Vec::with_capacity(1);
        let records = self.collect(source.as_ref(), &result, query, normalizer, &mut providers);
        StrategyOutcome::from_pools(self.rank(records), providers)
    }

    /// Normalize one call's output, keep what matches the query, record the outcome.
    fn collect(
        &self,
        source: &dyn PoolSource,
        result: &Result<RawBatch, SourceError>,
        query: &PoolQuery,
        normalizer: Normalizer,
        providers: &mut Vec<ProviderOutcome>,
    ) -> Vec<PoolRecord> {
        match result {
            Ok(batch) => {
                let records: Vec<PoolRecord> = normalizer
                    .normalize_batch(batch, source.descriptor())
                    .into_iter()
                    .filter(|r| matches_query(r, query))
                    .collect();
                debug!("{}: {} of {} records usable", source.name(), records.len(), batch.len());
                providers.push(ProviderOutcome::success(source.name(), records.len()));
                records
            }
            Err(e) => {
                warn!("Source {} failed: {}", source.name(), e);
                providers.push(ProviderOutcome::failure(source.name(), e));
                Vec::new()
            }
        }
    }

    /// Metrics, dedup (higher APR wins), stable sort by APR desc, truncate.
    fn rank(&self, records: Vec<PoolRecord>) -> Vec<PoolWithMetrics> {
        let mut pools = merge(records.into_iter().map(metrics::attach).collect());
        pools.sort_by(|a, b| b.metrics.apr.total_cmp(&a.metrics.apr));
        pools.truncate(self.max_results);
        pools
    }
}

/// Fetch with the source's own deadline; overrunning counts as a timeout.
async fn fetch_bounded(source: &dyn PoolSource, query: &PoolQuery) -> Result<RawBatch, SourceError> {
    let deadline = source.deadline();
    match tokio::time::timeout(deadline, source.fetch(query)).await {
        Ok(result) => result,
        Err(_) => Err(SourceError::Timeout {
            provider: source.name().to_string(),
            secs: deadline.as_secs(),
        }),
    }
}

fn matches_query(record: &PoolRecord, query: &PoolQuery) -> bool {
    (query.is_all_dexes() || record.dex == query.dex)
        && query.chain.as_deref().map_or(true, |chain| record.chain == chain)
}

/// Two records with the same merge key describe one pool when they come from
/// different providers or carry the same id. One provider's fee tiers stay apart.
fn same_pool(a: &PoolRecord, b: &PoolRecord) -> bool {
    a.source_tag != b.source_tag || a.id == b.id
}

/// Collapse records describing the same pool, keeping the higher APR at the first position.
fn merge(pools: Vec<PoolWithMetrics>) -> Vec<PoolWithMetrics> {
    let mut index: HashMap<(String, String, String), Vec<usize>> = HashMap::with_capacity(pools.len());
    let mut merged: Vec<PoolWithMetrics> = Vec::with_capacity(pools.len());

    for pool in pools {
        let slots = index.entry(pool.pool.merge_key()).or_default();
        let existing = slots
            .iter()
            .copied()
            .find(|&i| same_pool(&merged[i].pool, &pool.pool));
        match existing {
            Some(i) => {
                if pool.metrics.apr > merged[i].metrics.apr {
                    merged[i] = pool;
                }
            }
            None => {
                slots.push(merged.len());
                merged.push(pool);
            }
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::raw::{SubgraphPoolDay, SubgraphToken, SubgraphV3Pool, YieldPool};
    use crate::models::{PoolVersion, RawPool};
    use crate::sources::{SourceDescriptor, SourceKind};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct StubSource {
        descriptor: SourceDescriptor,
        response: Result<Vec<RawPool>, SourceError>,
        delay: Duration,
        deadline: Duration,
        calls: AtomicUsize,
    }

    impl StubSource {
        fn indexer(dex: &str, chain: &str, response: Result<Vec<RawPool>, SourceError>) -> Self {
            Self {
                descriptor: SourceDescriptor {
                    name: format!("{}-v3-{}", dex, chain),
                    kind: SourceKind::GraphQl,
                    dex: Some(dex.to_string()),
                    version: Some(PoolVersion::V3),
                    chain: Some(chain.to_string()),
                },
                response,
                delay: Duration::ZERO,
                deadline: Duration::from_secs(5),
                calls: AtomicUsize::new(0),
            }
        }

        fn listing(response: Result<Vec<RawPool>, SourceError>) -> Self {
            Self {
                descriptor: SourceDescriptor::listing("defillama", SourceKind::Rest),
                response,
                delay: Duration::ZERO,
                deadline: Duration::from_secs(5),
                calls: AtomicUsize::new(0),
            }
        }

        fn slow(mut self, delay: Duration, deadline: Duration) -> Self {
            self.delay = delay;
            self.deadline = deadline;
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PoolSource for StubSource {
        fn descriptor(&self) -> &SourceDescriptor {
            &self.descriptor
        }

        fn deadline(&self) -> Duration {
            self.deadline
        }

        async fn fetch(&self, _query: &PoolQuery) -> Result<RawBatch, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.response.clone().map(RawBatch::new)
        }
    }

    fn pool(symbol: &str, project: &str, chain: &str, tvl: f64, apy: Option<f64>) -> RawPool {
        RawPool::Yield(YieldPool {
            symbol: Some(symbol.to_string()),
            project: Some(project.to_string()),
            chain: Some(chain.to_string()),
            tvl_usd: Some(tvl),
            apy,
            volume_usd1d: Some(tvl * 0.1),
            ..Default::default()
        })
    }

    fn timeout(provider: &str) -> SourceError {
        SourceError::Timeout {
            provider: provider.to_string(),
            secs: 15,
        }
    }

    fn aggregator(sources: Vec<Arc<dyn PoolSource>>) -> PoolAggregator {
        PoolAggregator::new(sources, Normalizer::default(), 500)
    }

    #[tokio::test]
    async fn test_results_sorted_by_apr_descending() {
        let source = Arc::new(StubSource::indexer(
            "uniswap",
            "ethereum",
            Ok(vec![
                pool("A-USDC", "uniswap-v3", "Ethereum", 1e6, Some(3.0)),
                pool("B-USDC", "uniswap-v3", "Ethereum", 1e6, Some(12.0)),
                pool("C-USDC", "uniswap-v3", "Ethereum", 1e6, None),
                pool("D-USDC", "uniswap-v3", "Ethereum", 1e6, Some(7.5)),
            ]),
        ));

        let result = aggregator(vec![source]).aggregate(&PoolQuery::all()).await;

        assert_eq!(result.source, ResultSource::Primary);
        assert!(!result.cached);
        let aprs: Vec<f64> = result.pools.iter().map(|p| p.metrics.apr).collect();
        assert!(aprs.windows(2).all(|w| w[0] >= w[1]), "{:?}", aprs);
        assert_eq!(result.pools[0].pool.token0, "B");
    }

    #[tokio::test]
    async fn test_equal_apr_keeps_registration_order() {
        let first = Arc::new(
            StubSource::indexer(
                "uniswap",
                "ethereum",
                Ok(vec![pool("A-USDC", "uniswap-v3", "Ethereum", 1e6, Some(5.0))]),
            )
            .slow(Duration::from_millis(30), Duration::from_secs(5)),
        );
        // Finishes first but is registered second.
        let second = Arc::new(StubSource::indexer(
            "sushiswap",
            "ethereum",
            Ok(vec![pool("B-USDC", "sushiswap", "Ethereum", 1e6, Some(5.0))]),
        ));

        let result = aggregator(vec![first, second]).aggregate(&PoolQuery::all()).await;
        let tokens: Vec<&str> = result.pools.iter().map(|p| p.pool.token0.as_str()).collect();
        assert_eq!(tokens, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_one_failing_source_does_not_hide_others() {
        let down = Arc::new(StubSource::indexer("uniswap", "ethereum", Err(timeout("uniswap-v3-ethereum"))));
        let up = Arc::new(StubSource::indexer(
            "uniswap",
            "arbitrum",
            Ok(vec![pool("ARB-WETH", "uniswap-v3", "Arbitrum", 2e6, Some(8.0))]),
        ));

        let result = aggregator(vec![down, up]).aggregate(&PoolQuery::new("uniswap", None)).await;

        assert_eq!(result.source, ResultSource::Primary);
        assert_eq!(result.len(), 1);
        assert_eq!(result.providers.len(), 2);
        assert!(!result.providers[0].ok);
        assert!(result.providers[0].error.as_deref().unwrap().contains("timed out"));
        assert!(result.providers[1].ok);
    }

    #[tokio::test]
    async fn test_chain_filter_narrows_fan_out() {
        let eth = Arc::new(StubSource::indexer("uniswap", "ethereum", Ok(vec![])));
        let arb = Arc::new(StubSource::indexer(
            "uniswap",
            "arbitrum",
            Ok(vec![pool("ARB-WETH", "uniswap-v3", "Arbitrum", 2e6, Some(8.0))]),
        ));
        let agg = aggregator(vec![eth.clone(), arb.clone()]);

        let result = agg.aggregate(&PoolQuery::new("uniswap-v3", Some("arbitrum"))).await;

        assert_eq!(eth.calls(), 0);
        assert_eq!(arb.calls(), 1);
        assert_eq!(result.len(), 1);
        assert_eq!(result.pools[0].pool.chain, "arbitrum");
    }

    #[tokio::test]
    async fn test_pancakeswap_timeouts_fall_back_to_listing() {
        let v3 = Arc::new(
            StubSource::indexer("pancakeswap", "bsc", Ok(vec![]))
                .slow(Duration::from_secs(10), Duration::from_millis(50)),
        );
        let v2 = Arc::new(StubSource::indexer("pancakeswap", "bsc", Err(timeout("pancakeswap-v2-bsc"))));
        let listing = Arc::new(StubSource::listing(Ok(vec![
            pool("CAKE-WBNB", "pancakeswap-amm-v3", "BSC", 3e6, Some(20.0)),
            pool("WETH-USDC", "uniswap-v3", "Ethereum", 3e6, Some(5.0)),
        ])));

        let agg = aggregator(vec![v3, v2]).with_fallback(listing.clone());
        let result = agg.aggregate(&PoolQuery::new("pancakeswap", None)).await;

        assert_eq!(result.source, ResultSource::Fallback);
        assert_eq!(listing.calls(), 1);
        assert_eq!(result.len(), 1);
        assert_eq!(result.pools[0].pool.dex, "pancakeswap");
        assert_eq!(result.pools[0].pool.source_tag, "defillama");
        assert!(result.providers.iter().filter(|p| !p.ok).count() >= 2);
    }

    #[tokio::test]
    async fn test_total_outage_yields_flagged_synthetic_data() {
        let down = Arc::new(StubSource::indexer("uniswap", "ethereum", Err(timeout("uniswap-v3-ethereum"))));
        let listing = Arc::new(StubSource::listing(Err(SourceError::Status {
            provider: "defillama".to_string(),
            status: 503,
        })));

        let agg = aggregator(vec![down])
            .with_fallback(listing)
            .with_synthetic(Arc::new(SyntheticSource::new(6).with_seed(7)));
        let result = agg.aggregate(&PoolQuery::new("uniswap", None)).await;

        assert_eq!(result.source, ResultSource::Synthetic);
        assert_eq!(result.len(), 6);
        assert!(result.pools.iter().all(|p| p.pool.dex == "uniswap"));
        assert!(result.pools.iter().all(|p| p.pool.source_tag == "synthetic"));
    }

    #[tokio::test]
    async fn test_default_synthetic_count_follows_config_default() {
        let result = aggregator(vec![]).aggregate(&PoolQuery::new("uniswap", None)).await;

        assert_eq!(result.source, ResultSource::Synthetic);
        assert_eq!(result.len(), AggregatorConfig::default().synthetic_count);
    }

    #[tokio::test]
    async fn test_unknown_dex_goes_straight_to_listing() {
        let uni = Arc::new(StubSource::indexer("uniswap", "ethereum", Ok(vec![])));
        let listing = Arc::new(StubSource::listing(Ok(vec![pool(
            "DAI-USDC-USDT",
            "curve-dex",
            "Ethereum",
            5e7,
            Some(2.1),
        )])));

        let agg = aggregator(vec![uni.clone()]).with_fallback(listing);
        let result = agg.aggregate(&PoolQuery::new("curve", None)).await;

        assert_eq!(uni.calls(), 0);
        assert_eq!(result.source, ResultSource::Fallback);
        assert_eq!(result.pools[0].pool.dex, "curve");
    }

    #[tokio::test]
    async fn test_duplicate_pools_keep_higher_apr() {
        let a = Arc::new(StubSource::indexer(
            "uniswap",
            "ethereum",
            Ok(vec![pool("WETH-USDC", "uniswap-v3", "Ethereum", 1e6, Some(4.2))]),
        ));
        let mut b = StubSource::indexer(
            "uniswap",
            "ethereum",
            Ok(vec![pool("WETH/USDC", "uniswap-v2", "Ethereum", 1e6, Some(9.8))]),
        );
        b.descriptor.name = "uniswap-v2-ethereum".to_string();

        let result = aggregator(vec![a, Arc::new(b)]).aggregate(&PoolQuery::all()).await;

        assert_eq!(result.len(), 1);
        assert_eq!(result.pools[0].metrics.apr, 9.8);
        assert_eq!(result.pools[0].pool.source_tag, "uniswap-v2-ethereum");
    }

    fn v3_pool(id: &str, fee_ppm: f64) -> RawPool {
        let token = |symbol: &str| {
            Some(SubgraphToken {
                symbol: Some(symbol.to_string()),
            })
        };
        RawPool::SubgraphV3(SubgraphV3Pool {
            id: Some(id.to_string()),
            token0: token("WETH"),
            token1: token("USDC"),
            total_value_locked_usd: Some(5e6),
            fee_tier: Some(fee_ppm),
            pool_day_data: vec![SubgraphPoolDay {
                volume_usd: Some(2e6),
            }],
        })
    }

    #[tokio::test]
    async fn test_fee_tiers_from_one_indexer_stay_separate() {
        let source = Arc::new(StubSource::indexer(
            "uniswap",
            "ethereum",
            Ok(vec![
                v3_pool("0xa", 500.0),
                v3_pool("0xb", 3000.0),
                v3_pool("0xc", 10000.0),
            ]),
        ));

        let result = aggregator(vec![source]).aggregate(&PoolQuery::all()).await;

        let ids: Vec<&str> = result.pools.iter().map(|p| p.pool.id.as_str()).collect();
        assert_eq!(ids, vec!["0xc", "0xb", "0xa"]);
        assert!(result.pools.iter().all(|p| p.pool.pair_label == "WETH/USDC"));
    }

    #[tokio::test]
    async fn test_repeated_id_from_one_indexer_is_collapsed() {
        let source = Arc::new(StubSource::indexer(
            "uniswap",
            "ethereum",
            Ok(vec![v3_pool("0xa", 500.0), v3_pool("0xa", 3000.0)]),
        ));

        let result = aggregator(vec![source]).aggregate(&PoolQuery::all()).await;

        assert_eq!(result.len(), 1);
        assert_eq!(result.pools[0].pool.fee_tier_fraction, 0.003);
    }

    #[tokio::test]
    async fn test_fallback_reuses_enrichment_listing() {
        let down = Arc::new(StubSource::indexer("uniswap", "ethereum", Err(timeout("uniswap-v3-ethereum"))));
        let listing = Arc::new(StubSource::listing(Ok(vec![pool(
            "WETH-USDC",
            "uniswap-v3",
            "Ethereum",
            3e6,
            Some(5.0),
        )])));

        let result = aggregator(vec![down])
            .with_fallback(listing.clone())
            .with_enrichment(listing.clone())
            .aggregate(&PoolQuery::new("uniswap", None))
            .await;

        assert_eq!(result.source, ResultSource::Fallback);
        assert_eq!(result.len(), 1);
        assert_eq!(listing.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_enrichment_listing_is_fetched_again_for_fallback() {
        let down = Arc::new(StubSource::indexer("uniswap", "ethereum", Err(timeout("uniswap-v3-ethereum"))));
        let listing = Arc::new(StubSource::listing(Err(SourceError::Status {
            provider: "defillama".to_string(),
            status: 502,
        })));

        let result = aggregator(vec![down])
            .with_fallback(listing.clone())
            .with_enrichment(listing.clone())
            .aggregate(&PoolQuery::new("uniswap", None))
            .await;

        assert_eq!(listing.calls(), 2);
        assert_eq!(result.source, ResultSource::Synthetic);
    }

    #[tokio::test]
    async fn test_cap_is_not_reached_below_max() {
        let records: Vec<RawPool> = (0..300)
            .map(|i| pool(&format!("T{}-USDT", i), "pancakeswap-v3", "BSC", 1e6 + i as f64, Some(1.0 + i as f64)))
            .collect();
        let bsc = Arc::new(StubSource::indexer("pancakeswap", "bsc", Ok(records)));
        let eth = Arc::new(StubSource::indexer(
            "uniswap",
            "ethereum",
            Ok(vec![pool("WETH-USDC", "uniswap-v3", "Ethereum", 1e6, Some(50.0))]),
        ));

        let result = aggregator(vec![bsc, eth.clone()])
            .aggregate(&PoolQuery::new("all", Some("bsc")))
            .await;

        assert_eq!(eth.calls(), 0);
        assert_eq!(result.len(), 300);
        assert!(result.pools.iter().all(|p| p.pool.chain == "bsc"));
    }

    #[tokio::test]
    async fn test_truncates_to_max_results() {
        let records: Vec<RawPool> = (0..50)
            .map(|i| pool(&format!("T{}-USDT", i), "uniswap-v3", "Ethereum", 1e6, Some(i as f64 + 1.0)))
            .collect();
        let source = Arc::new(StubSource::indexer("uniswap", "ethereum", Ok(records)));

        let result = PoolAggregator::new(vec![source], Normalizer::default(), 10)
            .aggregate(&PoolQuery::all())
            .await;

        assert_eq!(result.len(), 10);
        assert_eq!(result.pools[0].metrics.apr, 50.0);
    }

    #[tokio::test]
    async fn test_enrichment_only_raises_apr() {
        let indexer = Arc::new(StubSource::indexer(
            "uniswap",
            "ethereum",
            Ok(vec![
                pool("WETH-USDC", "uniswap-v3", "Ethereum", 1e6, None),
                pool("WBTC-WETH", "uniswap-v3", "Ethereum", 1e6, Some(30.0)),
            ]),
        ));
        let listing = Arc::new(StubSource::listing(Ok(vec![
            pool("WETH-USDC", "uniswap-v3", "Ethereum", 1e6, Some(25.0)),
            pool("WBTC-WETH", "uniswap-v3", "Ethereum", 1e6, Some(2.0)),
        ])));

        let result = aggregator(vec![indexer])
            .with_enrichment(listing)
            .aggregate(&PoolQuery::all())
            .await;

        let apr_of = |t0: &str| {
            result
                .pools
                .iter()
                .find(|p| p.pool.token0 == t0)
                .map(|p| p.metrics.apr)
                .unwrap()
        };
        assert_eq!(apr_of("WETH"), 25.0);
        assert_eq!(apr_of("WBTC"), 30.0);
        assert_eq!(result.providers.len(), 2);
    }

    #[test]
    fn test_enrichment_secondary_key() {
        let listed = Normalizer::default()
            .normalize(
                &pool("WETH-USDC", "uniswap-v3", "Ethereum", 1e6, Some(40.0)),
                &SourceDescriptor::listing("defillama", SourceKind::Rest),
            )
            .unwrap();
        let index = EnrichmentIndex::build(&[listed.clone()]);

        let mut record = listed;
        record.pair_label = "WETH/USDC (0.3%)".to_string();
        record.provider_apy_total = 0.0;
        assert!(index.apply(&mut record));
        assert_eq!(record.provider_apy_total, 40.0);
    }
}

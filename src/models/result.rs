use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::PoolWithMetrics;

/// Which strategy produced an aggregation result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    /// Concurrent fan-out over every matching indexer
    Primary,
    /// The general REST aggregation provider alone
    Fallback,
    /// Generated sample data, not real
    Synthetic,
}

impl fmt::Display for ResultSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultSource::Primary => write!(f, "primary"),
            ResultSource::Fallback => write!(f, "fallback"),
            ResultSource::Synthetic => write!(f, "synthetic"),
        }
    }
}

/// Outcome of one source call, kept for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderOutcome {
    pub name: String,
    pub ok: bool,
    pub records: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProviderOutcome {
    pub fn success(name: &str, records: usize) -> Self {
        Self {
            name: name.to_string(),
            ok: true,
            records,
            error: None,
        }
    }

    pub fn failure(name: &str, error: impl fmt::Display) -> Self {
        Self {
            name: name.to_string(),
            ok: false,
            records: 0,
            error: Some(error.to_string()),
        }
    }
}

/// Ordered aggregation output. Immutable once cached; callers get clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationResult {
    pub pools: Vec<PoolWithMetrics>,
    pub source: ResultSource,
    pub cached: bool,
    pub generated_at: DateTime<Utc>,
    pub providers: Vec<ProviderOutcome>,
}

impl AggregationResult {
    pub fn new(
        pools: Vec<PoolWithMetrics>,
        source: ResultSource,
        providers: Vec<ProviderOutcome>,
    ) -> Self {
        Self {
            pools,
            source,
            cached: false,
            generated_at: Utc::now(),
            providers,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Only live upstream data is worth pinning for a TTL. Empty and synthetic
    /// results are recomputed so an outage clears on the next request.
    pub fn is_cacheable(&self) -> bool {
        !self.is_empty() && self.source != ResultSource::Synthetic
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }
}

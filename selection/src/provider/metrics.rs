use prometheus_client::{metrics::counter::Counter, registry::Registry};

/// Metrics for the [Provider](super::Provider).
#[derive(Default)]
pub struct Metrics {
    /// Number of policies served from the cache
    pub cache_hits: Counter,
    /// Number of policies missing from the cache
    pub cache_misses: Counter,
    /// Number of policies fetched from a target
    pub queries: Counter,
    /// Number of failed queries to individual targets
    pub query_failures: Counter,
}

impl Metrics {
    /// Create and return a new set of metrics, registered with the given registry.
    pub fn init(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        let registry = registry.sub_registry_with_prefix("provider");
        registry.register(
            "cache_hits",
            "Number of policies served from the cache",
            metrics.cache_hits.clone(),
        );
        registry.register(
            "cache_misses",
            "Number of policies missing from the cache",
            metrics.cache_misses.clone(),
        );
        registry.register(
            "queries",
            "Number of policies fetched from a target",
            metrics.queries.clone(),
        );
        registry.register(
            "query_failures",
            "Number of failed queries to individual targets",
            metrics.query_failures.clone(),
        );
        metrics
    }
}

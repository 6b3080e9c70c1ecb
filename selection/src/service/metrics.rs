use prometheus_client::{metrics::counter::Counter, registry::Registry};

/// Metrics for the [Service](super::Service).
#[derive(Default)]
pub struct Metrics {
    /// Number of requests served by a cached resolver
    pub cache_hits: Counter,
    /// Number of resolvers compiled
    pub compilations: Counter,
    /// Number of peer groups resolved
    pub resolutions: Counter,
    /// Number of requests whose policies no peer group satisfies
    pub unsatisfiable: Counter,
}

impl Metrics {
    /// Create and return a new set of metrics, registered with the given registry.
    pub fn init(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        let registry = registry.sub_registry_with_prefix("service");
        registry.register(
            "cache_hits",
            "Number of requests served by a cached resolver",
            metrics.cache_hits.clone(),
        );
        registry.register(
            "compilations",
            "Number of resolvers compiled",
            metrics.compilations.clone(),
        );
        registry.register(
            "resolutions",
            "Number of peer groups resolved",
            metrics.resolutions.clone(),
        );
        registry.register(
            "unsatisfiable",
            "Number of requests whose policies no peer group satisfies",
            metrics.unsatisfiable.clone(),
        );
        metrics
    }
}

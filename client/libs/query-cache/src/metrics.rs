//! Cache metrics for observability

use crate::keys::CacheKey;
use crate::mutation::MutationKind;
use prometheus::{CounterVec, Opts, Registry};
use std::sync::OnceLock;

static METRICS: OnceLock<CacheMetricsInner> = OnceLock::new();

struct CacheMetricsInner {
    hits: CounterVec,
    misses: CounterVec,
    fetches: CounterVec,
    fetch_errors: CounterVec,
    invalidations: CounterVec,
    mutations: CounterVec,
    rollbacks: CounterVec,
}

impl CacheMetricsInner {
    fn new() -> Self {
        Self {
            hits: CounterVec::new(
                Opts::new("query_cache_hits_total", "Queries served from a fresh entry"),
                &["entity"],
            )
            .expect("valid metric definition"),
            misses: CounterVec::new(
                Opts::new(
                    "query_cache_misses_total",
                    "Queries that found an absent or stale entry",
                ),
                &["entity"],
            )
            .expect("valid metric definition"),
            fetches: CounterVec::new(
                Opts::new("query_cache_fetches_total", "Completed remote fetches"),
                &["entity"],
            )
            .expect("valid metric definition"),
            fetch_errors: CounterVec::new(
                Opts::new(
                    "query_cache_fetch_errors_total",
                    "Fetches that failed after retry",
                ),
                &["entity"],
            )
            .expect("valid metric definition"),
            invalidations: CounterVec::new(
                Opts::new(
                    "query_cache_invalidations_total",
                    "Entries marked stale by invalidation",
                ),
                &["entity"],
            )
            .expect("valid metric definition"),
            mutations: CounterVec::new(
                Opts::new("query_cache_mutations_total", "Settled mutations"),
                &["kind", "outcome"],
            )
            .expect("valid metric definition"),
            rollbacks: CounterVec::new(
                Opts::new(
                    "query_cache_rollbacks_total",
                    "Optimistic updates restored from snapshot",
                ),
                &["kind"],
            )
            .expect("valid metric definition"),
        }
    }

    fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.hits.clone()))?;
        registry.register(Box::new(self.misses.clone()))?;
        registry.register(Box::new(self.fetches.clone()))?;
        registry.register(Box::new(self.fetch_errors.clone()))?;
        registry.register(Box::new(self.invalidations.clone()))?;
        registry.register(Box::new(self.mutations.clone()))?;
        registry.register(Box::new(self.rollbacks.clone()))?;
        Ok(())
    }
}

fn get_metrics() -> &'static CacheMetricsInner {
    METRICS.get_or_init(CacheMetricsInner::new)
}

/// Cache metrics wrapper
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheMetrics;

impl CacheMetrics {
    pub fn new() -> Self {
        Self
    }

    /// Register metrics with a Prometheus registry
    pub fn register(registry: &Registry) -> Result<(), prometheus::Error> {
        get_metrics().register(registry)
    }

    pub fn record_hit(&self, key: &CacheKey) {
        get_metrics().hits.with_label_values(&[key.entity()]).inc();
    }

    pub fn record_miss(&self, key: &CacheKey) {
        get_metrics().misses.with_label_values(&[key.entity()]).inc();
    }

    pub fn record_fetch(&self, key: &CacheKey) {
        get_metrics().fetches.with_label_values(&[key.entity()]).inc();
    }

    pub fn record_fetch_error(&self, key: &CacheKey) {
        get_metrics()
            .fetch_errors
            .with_label_values(&[key.entity()])
            .inc();
    }

    pub fn record_invalidation(&self, key: &CacheKey) {
        get_metrics()
            .invalidations
            .with_label_values(&[key.entity()])
            .inc();
    }

    pub fn record_mutation(&self, kind: MutationKind, outcome: &str) {
        get_metrics()
            .mutations
            .with_label_values(&[kind.label(), outcome])
            .inc();
    }

    pub fn record_rollback(&self, kind: MutationKind) {
        get_metrics()
            .rollbacks
            .with_label_values(&[kind.label()])
            .inc();
    }
}

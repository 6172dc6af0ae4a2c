//! Query aggregator: cache lookup, fan-out, merge, cache store, respond
//!
//! ```text
//! CacheLookup ──hit──> Respond (served_from_cache = true)
//!      │
//!     miss
//!      v
//!   FanOut ──> Merge ──> CacheStore ──> Respond
//! ```
//!
//! The `realtime` strategy skips both cache steps. `aggressive` and
//! `conservative` only differ in the TTL used by the store step.

use crate::backend::KnowledgeBackend;
use crate::cache::key::{aggregate_key, normalize_text, query_fingerprint};
use crate::cache::{spawn_auto_cleanup, TieredCache};
use crate::config::AggregatorConfig;
use crate::error::{AggregatorError, Result};
use crate::fanout::{FanOutExecutor, Outcome};
use crate::health::{check_backends, HealthReport};
use crate::merge::{AggregateResult, ResultMerger};
use crate::query::{CacheStrategy, Query, QueryFilters};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Where the time of one request went
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingBreakdown {
    pub cache_check: Duration,
    /// Zero on a cache hit
    pub fan_out: Duration,
    /// Zero on a cache hit
    pub merge: Duration,
    pub total: Duration,
}

/// Per-backend slice of a fresh aggregation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendReport {
    pub result_count: usize,
    pub latency: Duration,
    /// Failure reason; the backend contributed nothing
    pub error: Option<String>,
}

impl From<&Outcome> for BackendReport {
    fn from(outcome: &Outcome) -> Self {
        Self {
            result_count: outcome.result_count(),
            latency: outcome.latency(),
            error: outcome.error().map(|e| e.to_string()),
        }
    }
}

/// Everything returned for one query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateResponse {
    pub result: AggregateResult,
    pub fingerprint: String,
    pub request_id: Uuid,
    pub strategy: CacheStrategy,
    pub timing: TimingBreakdown,
    /// Empty when served from cache
    pub backends: BTreeMap<String, BackendReport>,
}

impl AggregateResponse {
    pub fn served_from_cache(&self) -> bool {
        self.result.served_from_cache
    }
}

/// Per-request observability record
#[derive(Debug, Clone, Serialize)]
pub struct QueryMetrics {
    pub request_id: Uuid,
    pub query: String,
    pub fingerprint: String,
    pub strategy: CacheStrategy,
    pub cache_hit: bool,
    pub backends: BTreeMap<String, BackendReport>,
    pub total_found: usize,
    pub returned: usize,
    pub timing: TimingBreakdown,
}

/// Receives a [`QueryMetrics`] record after every query
pub trait QueryObserver: Send + Sync {
    fn on_query(&self, metrics: &QueryMetrics);
}

/// Lifetime counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorStats {
    pub queries: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Backend calls that errored or timed out
    pub backend_failures: u64,
    /// Fresh results that at least one tier failed to store
    pub cache_store_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    queries: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    backend_failures: AtomicU64,
    cache_store_failures: AtomicU64,
}

/// Cache-aside aggregator over a fixed set of knowledge backends
pub struct QueryAggregator {
    /// Sorted by name
    backends: Vec<Arc<dyn KnowledgeBackend>>,
    cache: Arc<TieredCache>,
    executor: FanOutExecutor,
    merger: ResultMerger,
    config: AggregatorConfig,
    observers: Vec<Arc<dyn QueryObserver>>,
    counters: Counters,
}

impl QueryAggregator {
    pub fn builder() -> QueryAggregatorBuilder {
        QueryAggregatorBuilder::default()
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    /// Backend names in iteration order
    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// A query carrying the configured default limit
    pub fn new_query(&self, text: impl Into<String>) -> Query {
        Query::new(text).with_limit(self.config.default_limit)
    }

    /// Answer a query. Backend and cache failures are contained, so this
    /// always produces a well-formed response.
    pub async fn query(&self, query: &Query) -> AggregateResponse {
        let request_id = Uuid::new_v4();
        let started = Instant::now();
        let strategy = query.strategy();
        let fingerprint = query_fingerprint(query);
        let key = aggregate_key(query);
        self.counters.queries.fetch_add(1, Ordering::Relaxed);

        debug!(%request_id, %strategy, key = %key, "Aggregating query");

        // CacheLookup
        let lookup_started = Instant::now();
        let cached = if strategy.uses_cache() {
            self.lookup(&key, query).await
        } else {
            None
        };
        let cache_check = lookup_started.elapsed();

        if let Some(mut result) = cached {
            // CacheHit
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            result.served_from_cache = true;

            let timing = TimingBreakdown {
                cache_check,
                total: started.elapsed(),
                ..Default::default()
            };
            return self.respond(request_id, fingerprint, strategy, result, timing, BTreeMap::new());
        }
        if strategy.uses_cache() {
            self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
        }

        // FanOut
        let selected = self.select_backends(&query.filters());
        let fan_out_started = Instant::now();
        let outcomes = self.executor.fan_out(query, &selected).await;
        let fan_out = fan_out_started.elapsed();

        let failures = outcomes.values().filter(|o| !o.is_success()).count();
        self.counters
            .backend_failures
            .fetch_add(failures as u64, Ordering::Relaxed);
        let reports: BTreeMap<String, BackendReport> = outcomes
            .iter()
            .map(|(name, outcome)| (name.clone(), BackendReport::from(outcome)))
            .collect();

        // Merge
        let merge_started = Instant::now();
        let result = self.merger.merge(query, &outcomes);
        let merge = merge_started.elapsed();

        // CacheStore
        if strategy.uses_cache() {
            let ttl = strategy.ttl(self.config.aggressive_ttl, self.config.conservative_ttl);
            self.store(&key, &result, ttl).await;
        }

        let timing = TimingBreakdown {
            cache_check,
            fan_out,
            merge,
            total: started.elapsed(),
        };
        self.respond(request_id, fingerprint, strategy, result, timing, reports)
    }

    /// Drop the cached aggregate for this query (same limit and cross
    /// reference setting). Idempotent.
    pub async fn invalidate(&self, query: &Query) {
        let key = aggregate_key(query);
        self.cache.invalidate(&key).await;
        info!(key = %key, "Invalidated cached aggregate");
    }

    /// Probe every backend concurrently
    pub async fn health_check(&self) -> HealthReport {
        check_backends(
            &self.backends,
            self.config.backend_timeout,
            self.config.degraded_threshold_ms,
        )
        .await
    }

    pub fn stats(&self) -> AggregatorStats {
        AggregatorStats {
            queries: self.counters.queries.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.counters.cache_misses.load(Ordering::Relaxed),
            backend_failures: self.counters.backend_failures.load(Ordering::Relaxed),
            cache_store_failures: self.counters.cache_store_failures.load(Ordering::Relaxed),
        }
    }

    /// Cached aggregate for `key`, if it was computed for this query text.
    /// A fingerprint collision is treated as a miss.
    async fn lookup(&self, key: &str, query: &Query) -> Option<AggregateResult> {
        let result: AggregateResult = self.cache.get_json(key).await?;
        if normalize_text(&result.query) != normalize_text(&query.text) {
            warn!(key, "Cached aggregate belongs to a different query, ignoring");
            return None;
        }
        Some(result)
    }

    async fn store(&self, key: &str, result: &AggregateResult, ttl: Duration) {
        match self.cache.set_json(key, result, ttl).await {
            Ok(report) if report.is_clean() => {
                debug!(key, written = ?report.written, deferred = ?report.deferred, "Stored aggregate for {:?}", ttl);
            }
            Ok(report) => {
                self.counters.cache_store_failures.fetch_add(1, Ordering::Relaxed);
                warn!(key, failed = ?report.failed, "Aggregate not stored in every tier");
            }
            Err(e) => {
                self.counters.cache_store_failures.fetch_add(1, Ordering::Relaxed);
                warn!(key, "Failed to encode aggregate for caching: {}", e);
            }
        }
    }

    fn select_backends(&self, filters: &QueryFilters) -> Vec<Arc<dyn KnowledgeBackend>> {
        let selected: Vec<_> = self
            .backends
            .iter()
            .filter(|b| filters.allows_source(b.name()))
            .cloned()
            .collect();

        if selected.is_empty() {
            warn!(sources = ?filters.sources, "Source filter matches no configured backend");
        }
        selected
    }

    fn respond(
        &self,
        request_id: Uuid,
        fingerprint: String,
        strategy: CacheStrategy,
        result: AggregateResult,
        timing: TimingBreakdown,
        backends: BTreeMap<String, BackendReport>,
    ) -> AggregateResponse {
        let metrics = QueryMetrics {
            request_id,
            query: result.query.clone(),
            fingerprint: fingerprint.clone(),
            strategy,
            cache_hit: result.served_from_cache,
            backends: backends.clone(),
            total_found: result.total_found,
            returned: result.results.len(),
            timing,
        };

        let counts: BTreeMap<&str, usize> = backends
            .iter()
            .map(|(name, report)| (name.as_str(), report.result_count))
            .collect();
        info!(
            %request_id,
            query = %metrics.query,
            fingerprint = %metrics.fingerprint,
            cache_hit = metrics.cache_hit,
            %strategy,
            backends = ?counts,
            total_found = metrics.total_found,
            returned = metrics.returned,
            cache_check_ms = timing.cache_check.as_millis() as u64,
            fan_out_ms = timing.fan_out.as_millis() as u64,
            merge_ms = timing.merge.as_millis() as u64,
            total_ms = timing.total.as_millis() as u64,
            "Query aggregated"
        );

        for observer in &self.observers {
            observer.on_query(&metrics);
        }

        AggregateResponse {
            result,
            fingerprint,
            request_id,
            strategy,
            timing,
            backends,
        }
    }
}

/// Builder for [`QueryAggregator`]
#[derive(Default)]
pub struct QueryAggregatorBuilder {
    config: Option<AggregatorConfig>,
    backends: Vec<Arc<dyn KnowledgeBackend>>,
    cache: Option<Arc<TieredCache>>,
    observers: Vec<Arc<dyn QueryObserver>>,
}

impl QueryAggregatorBuilder {
    pub fn config(mut self, config: AggregatorConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn KnowledgeBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    /// Share an existing cache. Without one, a cache is built from the
    /// config's memory tier (external tiers need a store, so they must be
    /// supplied this way).
    pub fn cache(mut self, cache: Arc<TieredCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn QueryObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Fails with a configuration error on zero backends, blank or
    /// duplicate backend names, or an invalid config.
    pub fn build(self) -> Result<QueryAggregator> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        if self.backends.is_empty() {
            return Err(AggregatorError::ConfigurationError(
                "at least one knowledge backend must be configured".to_string(),
            ));
        }

        let mut names = BTreeSet::new();
        for backend in &self.backends {
            let name = backend.name();
            if name.trim().is_empty() {
                return Err(AggregatorError::ConfigurationError(
                    "backend name must not be empty".to_string(),
                ));
            }
            if !names.insert(name.to_string()) {
                return Err(AggregatorError::ConfigurationError(format!(
                    "duplicate backend name: {}",
                    name
                )));
            }
        }

        let mut backends = self.backends;
        backends.sort_by(|a, b| a.name().cmp(b.name()));

        // A caller-supplied cache keeps whatever sweep its owner set up
        let cache = match self.cache {
            Some(cache) => cache,
            None => {
                let cache = Arc::new(config.cache.build(Vec::new())?);
                spawn_auto_cleanup(&cache);
                cache
            }
        };

        info!(
            backends = ?names,
            tiers = ?cache.tier_names(),
            timeout_ms = config.backend_timeout.as_millis() as u64,
            "Query aggregator ready"
        );

        Ok(QueryAggregator {
            backends,
            cache,
            executor: FanOutExecutor::new(config.backend_timeout),
            merger: ResultMerger::new(),
            config,
            observers: self.observers,
            counters: Counters::default(),
        })
    }
}

//! Integration tests for the query aggregator
//!
//! Backends are in-test stubs with call counters so the tests can assert
//! exactly when the cache short-circuits the fan-out.

use async_trait::async_trait;
use futures::future::join_all;
use ouroboros_aggregator::{
    AggregatorConfig, AggregatorError, CacheStrategy, ExternalTierConfig, HealthStatus,
    KnowledgeBackend, KnowledgeRecord, MemoryTierConfig, MemoryTierStore, Query, QueryAggregator,
    QueryFilters, Result, TieredCache, WriteMode,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

enum Behavior {
    Records(Vec<KnowledgeRecord>),
    Fail,
    Hang,
}

struct StubBackend {
    name: String,
    behavior: Behavior,
    calls: AtomicUsize,
}

impl StubBackend {
    fn with_records(name: &str, records: Vec<KnowledgeRecord>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            behavior: Behavior::Records(records),
            calls: AtomicUsize::new(0),
        })
    }

    /// `count` distinct records whose ids never overlap with other backends
    fn returning(name: &str, count: usize) -> Arc<Self> {
        let records = (0..count)
            .map(|i| {
                KnowledgeRecord::new(format!("{} observation {} on client behavior", name, i), 0.7)
                    .with_id(format!("{}-{}", name, i))
            })
            .collect();
        Self::with_records(name, records)
    }

    fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            behavior: Behavior::Fail,
            calls: AtomicUsize::new(0),
        })
    }

    fn hanging(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            behavior: Behavior::Hang,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KnowledgeBackend for StubBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, _query: &Query) -> Result<Vec<KnowledgeRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Records(records) => Ok(records.clone()),
            Behavior::Fail => Err(AggregatorError::backend(&self.name, "connection refused")),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Vec::new())
            }
        }
    }

    async fn health_check(&self) -> Result<()> {
        match self.behavior {
            Behavior::Fail => Err(AggregatorError::backend(&self.name, "connection refused")),
            _ => Ok(()),
        }
    }
}

fn fast_config() -> AggregatorConfig {
    AggregatorConfig::builder()
        .backend_timeout(Duration::from_millis(200))
        .build()
}

#[tokio::test]
async fn test_client_behavior_patterns_end_to_end() {
    let a = StubBackend::returning("backendA", 2);
    let b = StubBackend::returning("backendB", 3);
    let c = StubBackend::returning("backendC", 1);
    let aggregator = QueryAggregator::builder()
        .backend(a.clone())
        .backend(b.clone())
        .backend(c.clone())
        .build()
        .unwrap();

    let query = Query::new("client behavior patterns");

    let cold = aggregator.query(&query).await;
    assert_eq!(cold.result.total_found, 6);
    assert_eq!(cold.result.sources["backendA"], 2);
    assert_eq!(cold.result.sources["backendB"], 3);
    assert_eq!(cold.result.sources["backendC"], 1);
    assert_eq!(cold.result.sources.len(), 3);
    assert!(!cold.served_from_cache());
    assert_eq!(cold.backends.len(), 3);

    let warm = aggregator.query(&query).await;
    assert!(warm.served_from_cache());
    assert_eq!(warm.result.results, cold.result.results);
    assert_eq!(warm.result.total_found, 6);
    assert_eq!(warm.fingerprint, cold.fingerprint);

    // Zero backend calls on the second query
    assert_eq!(a.calls() + b.calls() + c.calls(), 3);
}

#[tokio::test]
async fn test_one_failing_backend_is_excluded() {
    let aggregator = QueryAggregator::builder()
        .config(fast_config())
        .backend(StubBackend::returning("documents", 2))
        .backend(StubBackend::failing("graph"))
        .backend(StubBackend::returning("memory", 1))
        .build()
        .unwrap();

    let response = aggregator
        .query(&Query::new("client behavior").with_strategy(CacheStrategy::Realtime))
        .await;

    assert_eq!(response.result.total_found, 3);
    assert_eq!(response.result.sources["graph"], 0);
    assert!(response.backends["graph"]
        .error
        .as_deref()
        .unwrap()
        .contains("connection refused"));
    assert!(response.backends["documents"].error.is_none());
    assert_eq!(aggregator.stats().backend_failures, 1);
}

#[tokio::test]
async fn test_timed_out_backend_is_excluded() {
    let aggregator = QueryAggregator::builder()
        .config(fast_config())
        .backend(StubBackend::returning("documents", 2))
        .backend(StubBackend::hanging("graph"))
        .build()
        .unwrap();

    let response = aggregator.query(&Query::new("client behavior")).await;

    assert_eq!(response.result.total_found, 2);
    assert!(response.backends["graph"]
        .error
        .as_deref()
        .unwrap()
        .contains("timed out"));
    assert!(response.timing.fan_out < Duration::from_secs(5));
}

#[tokio::test]
async fn test_all_backends_failing_still_answers() {
    let aggregator = QueryAggregator::builder()
        .config(fast_config())
        .backend(StubBackend::failing("documents"))
        .backend(StubBackend::failing("graph"))
        .backend(StubBackend::hanging("memory"))
        .build()
        .unwrap();

    let response = aggregator.query(&Query::new("anything")).await;

    assert!(response.result.results.is_empty());
    assert_eq!(response.result.total_found, 0);
    assert!(!response.served_from_cache());
    assert_eq!(response.result.sources.len(), 3);
    assert!(response.result.sources.values().all(|count| *count == 0));
}

#[tokio::test]
async fn test_realtime_never_touches_cache() {
    let backend = StubBackend::returning("documents", 2);
    let aggregator = QueryAggregator::builder()
        .backend(backend.clone())
        .build()
        .unwrap();

    let query = Query::new("client behavior").with_strategy(CacheStrategy::Realtime);
    for _ in 0..3 {
        let response = aggregator.query(&query).await;
        assert!(!response.served_from_cache());
    }

    assert_eq!(backend.calls(), 3);
    let cache_stats = aggregator.cache().stats().await;
    assert_eq!(cache_stats.hits + cache_stats.misses, 0);
    assert_eq!(cache_stats.tiers[0].entries, Some(0));

    // A cacheable query for the same text is still a miss
    let conservative = aggregator.query(&Query::new("client behavior")).await;
    assert!(!conservative.served_from_cache());
}

#[tokio::test]
async fn test_strategies_share_cache_slot() {
    let backend = StubBackend::returning("documents", 1);
    let aggregator = QueryAggregator::builder()
        .backend(backend.clone())
        .build()
        .unwrap();

    aggregator
        .query(&Query::new("q").with_strategy(CacheStrategy::Aggressive))
        .await;
    let second = aggregator
        .query(&Query::new("Q").with_strategy(CacheStrategy::Conservative))
        .await;

    assert!(second.served_from_cache());
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_cached_result_expires_with_strategy_ttl() {
    let backend = StubBackend::returning("documents", 1);
    let aggregator = QueryAggregator::builder()
        .config(
            AggregatorConfig::builder()
                .conservative_ttl(Duration::from_millis(100))
                .build(),
        )
        .backend(backend.clone())
        .build()
        .unwrap();
    let query = Query::new("client behavior");

    aggregator.query(&query).await;
    assert!(aggregator.query(&query).await.served_from_cache());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!aggregator.query(&query).await.served_from_cache());
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn test_duplicate_ids_merge_to_highest_confidence() {
    let aggregator = QueryAggregator::builder()
        .backend(StubBackend::with_records(
            "documents",
            vec![KnowledgeRecord::new("retry policy decision", 0.4).with_id("decision-7")],
        ))
        .backend(StubBackend::with_records(
            "graph",
            vec![KnowledgeRecord::new("retry policy decision", 0.9).with_id("decision-7")],
        ))
        .build()
        .unwrap();

    let response = aggregator.query(&Query::new("retry policy")).await;

    assert_eq!(response.result.results.len(), 1);
    assert_eq!(response.result.results[0].confidence, 0.9);
    assert_eq!(response.result.sources["documents"], 1);
    assert_eq!(response.result.sources["graph"], 1);
}

#[tokio::test]
async fn test_close_confidences_ordered_by_relevance() {
    let aggregator = QueryAggregator::builder()
        .backend(StubBackend::with_records(
            "documents",
            vec![
                KnowledgeRecord::new("quarterly revenue summary", 0.91).with_id("r1"),
                KnowledgeRecord::new("client behavior patterns in onboarding", 0.85).with_id("r2"),
            ],
        ))
        .build()
        .unwrap();

    let response = aggregator
        .query(&Query::new("client behavior patterns"))
        .await;

    let ids: Vec<_> = response
        .result
        .results
        .iter()
        .filter_map(|r| r.id.as_deref())
        .collect();
    assert_eq!(ids, vec!["r2", "r1"]);
}

#[tokio::test]
async fn test_filters_and_limit() {
    let documents = StubBackend::returning("documents", 4);
    let graph = StubBackend::returning("graph", 4);
    let aggregator = QueryAggregator::builder()
        .backend(documents.clone())
        .backend(graph.clone())
        .build()
        .unwrap();

    let query = Query::new("client behavior")
        .with_filters(QueryFilters::new().with_source("documents"))
        .with_limit(2);
    let response = aggregator.query(&query).await;

    assert_eq!(response.result.total_found, 4);
    assert_eq!(response.result.results.len(), 2);
    assert_eq!(graph.calls(), 0);

    // A different limit is a different cache slot
    let wider = aggregator.query(&query.clone().with_limit(3)).await;
    assert!(!wider.served_from_cache());
    assert_eq!(wider.result.results.len(), 3);
}

#[tokio::test]
async fn test_unreachable_external_tier_does_not_fail_requests() {
    let redis = Arc::new(MemoryTierStore::new());
    redis.set_available(false);
    let cache = TieredCache::new(MemoryTierConfig::default())
        .unwrap()
        .with_tier(
            ExternalTierConfig::new("redis").with_write_mode(WriteMode::WriteThrough),
            redis,
        );
    let backend = StubBackend::returning("documents", 2);
    let aggregator = QueryAggregator::builder()
        .backend(backend.clone())
        .cache(Arc::new(cache))
        .build()
        .unwrap();

    let query = Query::new("client behavior");
    let fresh = aggregator.query(&query).await;
    assert_eq!(fresh.result.total_found, 2);
    assert_eq!(aggregator.stats().cache_store_failures, 1);

    // Memory tier still serves
    assert!(aggregator.query(&query).await.served_from_cache());
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_results_survive_in_external_tier() {
    let redis = Arc::new(MemoryTierStore::new());
    let cache = Arc::new(
        TieredCache::new(MemoryTierConfig::default())
            .unwrap()
            .with_tier(
                ExternalTierConfig::new("redis").with_write_mode(WriteMode::WriteThrough),
                redis.clone(),
            ),
    );
    let backend = StubBackend::returning("documents", 2);
    let aggregator = QueryAggregator::builder()
        .backend(backend.clone())
        .cache(cache.clone())
        .build()
        .unwrap();

    let query = Query::new("client behavior");
    aggregator.query(&query).await;

    // Lose the memory tier, as after a restart with a shared external store
    cache.clear_memory().await;
    let response = aggregator.query(&query).await;

    assert!(response.served_from_cache());
    assert_eq!(backend.calls(), 1);
    assert_eq!(cache.stats().await.promotions, 1);
}

#[tokio::test]
async fn test_concurrent_identical_queries() {
    let backend = StubBackend::returning("documents", 3);
    let aggregator = Arc::new(
        QueryAggregator::builder()
            .backend(backend.clone())
            .build()
            .unwrap(),
    );
    let query = Query::new("client behavior");

    let responses = join_all((0..8).map(|_| {
        let aggregator = aggregator.clone();
        let query = query.clone();
        async move { aggregator.query(&query).await }
    }))
    .await;

    let first = &responses[0].result.results;
    assert!(responses.iter().all(|r| &r.result.results == first));
    assert!(backend.calls() >= 1);
    assert_eq!(aggregator.stats().queries, 8);
}

#[tokio::test]
async fn test_health_report() {
    let aggregator = QueryAggregator::builder()
        .config(fast_config())
        .backend(StubBackend::returning("documents", 1))
        .backend(StubBackend::failing("graph"))
        .build()
        .unwrap();

    let report = aggregator.health_check().await;

    assert_eq!(report.overall, HealthStatus::Unhealthy);
    assert_eq!(report.backends.len(), 2);
    assert_eq!(report.backend("documents").unwrap().status, HealthStatus::Healthy);
    assert_eq!(report.backend("graph").unwrap().status, HealthStatus::Unhealthy);
}

#[test]
fn test_configuration_errors_at_startup() {
    let no_backends = QueryAggregator::builder().build();
    assert!(matches!(no_backends, Err(AggregatorError::ConfigurationError(_))));

    let bad_config = QueryAggregator::builder()
        .config(AggregatorConfig::builder().default_limit(0).build())
        .backend(StubBackend::returning("documents", 1))
        .build();
    assert!(bad_config.is_err());
}

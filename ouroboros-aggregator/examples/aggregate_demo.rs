//! Aggregation Demo Application
//!
//! Runs the same query against three in-process backends twice to show the
//! cold path, the cached path and a partial failure.
//!
//! Usage:
//!   cargo run --example aggregate_demo
//!
//! Environment variables (all optional, also read from `.env`):
//!   AGGREGATOR_BACKEND_TIMEOUT_MS     - per-backend timeout (default: 10000)
//!   AGGREGATOR_CONSERVATIVE_TTL_SECS  - cache TTL for the default strategy (default: 1800)
//!   RUST_LOG                          - log filter (default: ouroboros_aggregator=info)

use async_trait::async_trait;
use ouroboros_aggregator::{
    cache, telemetry, AggregatorConfig, AggregatorError, CacheStrategy, ExternalTierConfig,
    KnowledgeBackend, KnowledgeRecord, MemoryTierStore, Query, QueryAggregator, Result,
    TierStore,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

struct DemoBackend {
    name: &'static str,
    delay: Duration,
    notes: Vec<(&'static str, &'static str, f64)>,
}

#[async_trait]
impl KnowledgeBackend for DemoBackend {
    fn name(&self) -> &str {
        self.name
    }

    async fn search(&self, query: &Query) -> Result<Vec<KnowledgeRecord>> {
        tokio::time::sleep(self.delay).await;
        let terms = query.terms();
        Ok(self
            .notes
            .iter()
            .filter(|(_, content, _)| {
                let content = content.to_lowercase();
                terms.iter().any(|t| content.contains(t.as_str()))
            })
            .map(|(id, content, confidence)| {
                KnowledgeRecord::new(*content, *confidence)
                    .with_id(*id)
                    .with_content_type("note")
            })
            .collect())
    }
}

struct OfflineBackend;

#[async_trait]
impl KnowledgeBackend for OfflineBackend {
    fn name(&self) -> &str {
        "cloud-memory"
    }

    async fn search(&self, _query: &Query) -> Result<Vec<KnowledgeRecord>> {
        Err(AggregatorError::backend("cloud-memory", "service unavailable"))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing("ouroboros_aggregator=info,aggregate_demo=info");

    let mut config = AggregatorConfig::from_env()?;
    config
        .cache
        .external
        .push(ExternalTierConfig::new("shared").with_max_ttl(Duration::from_secs(600)));
    let store: Arc<dyn TierStore> = Arc::new(MemoryTierStore::new());
    let cache = Arc::new(config.cache.build(vec![store])?);
    cache::spawn_auto_cleanup(&cache);

    let aggregator = QueryAggregator::builder()
        .config(config)
        .cache(cache.clone())
        .backend(Arc::new(DemoBackend {
            name: "documents",
            delay: Duration::from_millis(40),
            notes: vec![
                ("doc-1", "Client behavior patterns shift after onboarding", 0.82),
                ("doc-2", "Churn correlates with support ticket volume", 0.64),
            ],
        }))
        .backend(Arc::new(DemoBackend {
            name: "graph",
            delay: Duration::from_millis(25),
            notes: vec![
                ("doc-1", "Client behavior patterns shift after onboarding", 0.90),
                ("node-7", "Client segment: enterprise, behavior: batch uploads", 0.88),
            ],
        }))
        .backend(Arc::new(OfflineBackend))
        .build()?;

    let query = aggregator
        .new_query("client behavior patterns")
        .with_cross_reference(true);

    info!("=== Cold query ===");
    let cold = aggregator.query(&query).await;
    for record in &cold.result.results {
        info!(
            "{:.2} [{}] {} (also in: {:?})",
            record.confidence, record.backend, record.content, record.also_found_in
        );
    }
    for (backend, report) in &cold.backends {
        info!(
            "{}: {} result(s) in {:?}{}",
            backend,
            report.result_count,
            report.latency,
            report
                .error
                .as_deref()
                .map(|e| format!(" ({})", e))
                .unwrap_or_default()
        );
    }
    info!("Timing: {:?}", cold.timing);

    info!("=== Warm query ===");
    let warm = aggregator.query(&query).await;
    info!(
        "served_from_cache={} total={:?}",
        warm.served_from_cache(),
        warm.timing.total
    );

    info!("=== Realtime query ===");
    let realtime = aggregator
        .query(&query.clone().with_strategy(CacheStrategy::Realtime))
        .await;
    info!("served_from_cache={}", realtime.served_from_cache());

    let health = aggregator.health_check().await;
    info!("Backend health: {:?}", health.overall);
    info!("Aggregator stats: {:?}", aggregator.stats());
    info!("Cache stats: {}", cache.stats().await);

    Ok(())
}

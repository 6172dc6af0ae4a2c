//! # Ouroboros Aggregator (ouroboros-aggregator)
//!
//! A multi-tier, cache-aside query aggregator over independent knowledge
//! backends.
//!
//! ## Features
//!
//! - Deterministic query fingerprints (SHA-256 over a canonical form)
//! - Tiered cache: bounded in-process LRU tier plus pluggable external tiers
//!   with TTL caps and promotion on hit
//! - Concurrent backend fan-out with per-backend timeouts and partial
//!   failure tolerance
//! - Dedup and ranking of the merged result set
//! - Per-request timing breakdown and observer hook
//! - Identity cache for bearer tokens in front of an external validator
//!
//! ## Quick start
//!
//! ```no_run
//! use async_trait::async_trait;
//! use ouroboros_aggregator::{
//!     AggregatorConfig, KnowledgeBackend, KnowledgeRecord, Query, QueryAggregator, Result,
//! };
//! use std::sync::Arc;
//!
//! struct Notes;
//!
//! #[async_trait]
//! impl KnowledgeBackend for Notes {
//!     fn name(&self) -> &str {
//!         "notes"
//!     }
//!
//!     async fn search(&self, query: &Query) -> Result<Vec<KnowledgeRecord>> {
//!         Ok(vec![KnowledgeRecord::new(format!("note about {}", query.text), 0.8)])
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let aggregator = QueryAggregator::builder()
//!         .config(AggregatorConfig::from_env()?)
//!         .backend(Arc::new(Notes))
//!         .build()?;
//!
//!     let response = aggregator.query(&Query::new("client behavior patterns")).await;
//!     println!(
//!         "{} result(s), cached: {}, took {:?}",
//!         response.result.total_found,
//!         response.served_from_cache(),
//!         response.timing.total
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Identity cache
//!
//! ```no_run
//! use async_trait::async_trait;
//! use ouroboros_aggregator::{
//!     IdentityCache, IdentityContext, Principal, Result, TokenDescriptor, TokenValidator,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct Introspection;
//!
//! #[async_trait]
//! impl TokenValidator for Introspection {
//!     async fn validate(&self, token: &str) -> Result<IdentityContext> {
//!         Ok(IdentityContext::authenticated(
//!             Principal::new("user-1"),
//!             TokenDescriptor::bearer(token),
//!         ))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let identities = IdentityCache::new(Arc::new(Introspection), Duration::from_secs(300))?;
//!     let context = identities.authenticate_header("Bearer tok1").await?;
//!     assert!(context.is_authenticated());
//!     Ok(())
//! }
//! ```

pub mod aggregator;
pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod fanout;
pub mod health;
pub mod identity;
pub mod merge;
pub mod query;
pub mod telemetry;

// Re-export main types for convenience
pub use aggregator::{
    AggregateResponse, AggregatorStats, BackendReport, QueryAggregator, QueryAggregatorBuilder,
    QueryMetrics, QueryObserver, TimingBreakdown,
};
pub use backend::{KnowledgeBackend, KnowledgeRecord};
pub use cache::{
    CacheKeyBuilder, CacheStats, ExternalTierConfig, MemoryTierConfig, MemoryTierStore,
    TierStore, TieredCache, WriteMode,
};
pub use config::{AggregatorConfig, AggregatorConfigBuilder, TieredCacheConfig};
pub use error::{AggregatorError, Result};
pub use fanout::{FanOutExecutor, Outcome};
pub use health::{HealthCheckResult, HealthReport, HealthStatus};
pub use identity::{
    extract_bearer_token, IdentityCache, IdentityCacheStats, IdentityContext, Principal,
    TokenDescriptor, TokenValidator,
};
pub use merge::{AggregateResult, ResultMerger};
pub use query::{CacheStrategy, Query, QueryFilters, QueryOptions};

//! # Tiered Caching Layer
//!
//! A cache-aside store made of an ordered list of tiers:
//!
//! - Tier 1: bounded in-process memory (byte budget, LRU eviction)
//! - Tiers 2+: external key-value stores with TTL support, reached through
//!   the [`TierStore`] trait
//!
//! ## Guarantees
//!
//! - **Ordered probing**: tier 1, then tier 2, then tier 3 on every `get`
//! - **Promotion without resurrection**: a hit in a slower tier is copied into
//!   every faster tier with its *remaining* TTL
//! - **TTL caps**: each tier may shorten a requested TTL, never extend it
//! - **Contained failures**: an unreachable external tier is a miss on read
//!   and a no-op on write
//!
//! ## Example
//!
//! ```rust
//! use ouroboros_aggregator::cache::{MemoryTierConfig, TieredCache};
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = MemoryTierConfig::builder()
//!     .max_size_bytes(16 * 1024 * 1024) // 16 MB
//!     .build();
//!
//! let cache = TieredCache::new(config)?;
//!
//! cache.set("query:123", "cached response".to_string(), Duration::from_secs(60)).await;
//!
//! if let Some(value) = cache.get("query:123").await {
//!     println!("Cache hit: {}", value);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod entry;
pub mod external;
pub mod key;
pub mod store;
pub mod tiered;
pub mod types;

pub use config::{ExternalTierConfig, MemoryTierConfig, MemoryTierConfigBuilder, WriteMode};
pub use entry::{CacheEntry, CacheMetadata};
pub use external::{ExternalTier, MemoryTierStore, TierStore};
pub use key::{aggregate_key, content_hash, fingerprint, query_fingerprint, CacheKeyBuilder, KeyNamespace};
pub use store::MemoryTier;
pub use tiered::{spawn_auto_cleanup, start_auto_cleanup, TieredCache, WriteReport};
pub use types::{CacheKey, CacheStats, CacheValue, InvalidationReason, TierKind, TierStats};

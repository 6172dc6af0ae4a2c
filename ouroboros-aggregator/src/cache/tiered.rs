//! Multi-tier cache: memory first, then external tiers in order

use crate::cache::{
    config::{ExternalTierConfig, MemoryTierConfig, WriteMode},
    entry::CacheEntry,
    external::{ExternalTier, TierStore},
    store::MemoryTier,
    types::{CacheStats, CacheValue, InvalidationReason},
};
use crate::error::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What happened to a `set` across tiers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    /// Tiers that accepted the value
    pub written: Vec<String>,
    /// Tiers whose write failed or was rejected
    pub failed: Vec<String>,
    /// Tiers whose write was handed to a background task
    pub deferred: Vec<String>,
}

impl WriteReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    promotions: AtomicU64,
}

/// Tiered cache-aside store
///
/// `get` probes the memory tier, then each external tier in insertion order.
/// A hit in a slower tier is written back into every faster tier with the
/// entry's remaining TTL, so repeated reads never extend a value's life.
pub struct TieredCache {
    memory: MemoryTier,
    external: Vec<Arc<ExternalTier>>,
    counters: Counters,
}

impl TieredCache {
    /// Memory-only cache
    pub fn new(config: MemoryTierConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            memory: MemoryTier::new(config),
            external: Vec::new(),
            counters: Counters::default(),
        })
    }

    /// Append a slower tier after the existing ones
    pub fn with_tier(mut self, config: ExternalTierConfig, store: Arc<dyn TierStore>) -> Self {
        info!(
            "Adding external cache tier {} at position {} ({:?})",
            config.name,
            self.external.len() + 2,
            config.write_mode
        );
        self.external.push(Arc::new(ExternalTier::new(config, store)));
        self
    }

    /// Tier names, fastest first
    pub fn tier_names(&self) -> Vec<String> {
        std::iter::once(self.memory.name().to_string())
            .chain(self.external.iter().map(|t| t.name().to_string()))
            .collect()
    }

    /// Look a key up across tiers
    pub async fn get(&self, key: &str) -> Option<CacheValue> {
        if let Some(entry) = self.memory.get(key).await {
            debug!(tier = %self.memory.name(), key, "Cache hit");
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Some(entry.value);
        }

        for (index, tier) in self.external.iter().enumerate() {
            let Some(entry) = tier.get(key).await else {
                continue;
            };

            debug!(tier = %tier.name(), key, "Cache hit, promoting to {} faster tier(s)", index + 1);
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            self.promote(&entry, index).await;
            return Some(entry.value);
        }

        debug!(key, "Cache miss");
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a value in every tier, each truncating `ttl` to its own cap.
    /// A zero TTL writes nothing.
    pub async fn set(&self, key: &str, value: CacheValue, ttl: Duration) -> WriteReport {
        let mut report = WriteReport::default();
        if ttl.is_zero() {
            return report;
        }

        let entry = CacheEntry::new(key.to_string(), value, ttl, self.memory.name());

        if self.memory.insert(entry.clone()).await {
            report.written.push(self.memory.name().to_string());
        } else {
            report.failed.push(self.memory.name().to_string());
        }

        for tier in &self.external {
            self.write_external(tier, &entry, &mut report).await;
        }

        report
    }

    /// Remove a key from all tiers; absent keys are a no-op
    pub async fn invalidate(&self, key: &str) {
        self.memory.remove(key).await;
        for tier in &self.external {
            tier.remove(key).await;
        }
        debug!(key, "Invalidated across {} tier(s)", self.external.len() + 1);
    }

    /// Typed read; an undecodable payload is invalidated and reported as a miss
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, "Dropping cache entry ({}): {}", InvalidationReason::Corrupt, e);
                self.invalidate(key).await;
                None
            }
        }
    }

    /// Typed write
    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<WriteReport> {
        let raw = serde_json::to_string(value)?;
        Ok(self.set(key, raw, ttl).await)
    }

    /// Drop expired entries from the memory tier
    pub async fn cleanup_expired(&self) -> usize {
        self.memory.cleanup_expired().await
    }

    /// Empty the memory tier. External tiers keep their TTL-bound contents.
    pub async fn clear_memory(&self) {
        self.memory.clear().await;
    }

    /// Counters plus per-tier occupancy
    pub async fn stats(&self) -> CacheStats {
        let mut tiers = vec![self.memory.stats().await];
        for tier in &self.external {
            tiers.push(tier.stats().await);
        }

        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: tiers.iter().map(|t| t.evictions).sum(),
            promotions: self.counters.promotions.load(Ordering::Relaxed),
            tier_failures: tiers.iter().map(|t| t.failures).sum(),
            tiers,
        }
    }

    /// Copy a hit from external tier `found_at` into every faster tier,
    /// keeping its absolute expiry
    async fn promote(&self, entry: &CacheEntry, found_at: usize) {
        let mut promoted = CacheEntry::with_expiration(
            entry.key.clone(),
            entry.value.clone(),
            entry.metadata.expires_at,
            &entry.metadata.origin_tier,
        );
        promoted.metadata.inserted_at = entry.metadata.inserted_at;

        self.memory.insert(promoted.clone()).await;

        let mut report = WriteReport::default();
        for tier in &self.external[..found_at] {
            self.write_external(tier, &promoted, &mut report).await;
        }

        self.counters.promotions.fetch_add(1, Ordering::Relaxed);
    }

    async fn write_external(&self, tier: &Arc<ExternalTier>, entry: &CacheEntry, report: &mut WriteReport) {
        match tier.config.write_mode {
            WriteMode::WriteThrough => {
                if tier.put(entry).await {
                    report.written.push(tier.name().to_string());
                } else {
                    report.failed.push(tier.name().to_string());
                }
            }
            WriteMode::Background => {
                report.deferred.push(tier.name().to_string());
                let tier = Arc::clone(tier);
                let entry = entry.clone();
                tokio::spawn(async move {
                    // Failures are counted inside the tier
                    tier.put(&entry).await;
                });
            }
        }
    }
}

/// Background task sweeping expired entries out of the memory tier.
///
/// Holds only a weak reference and ends once the cache is dropped.
pub async fn start_auto_cleanup(cache: Weak<TieredCache>) {
    let Some(interval) = cache.upgrade().map(|c| c.memory.config.cleanup_interval) else {
        return;
    };

    info!("Starting automatic cache cleanup task (interval: {:?})", interval);

    loop {
        tokio::time::sleep(interval).await;

        let Some(cache) = cache.upgrade() else {
            debug!("Cache dropped, stopping cleanup task");
            return;
        };
        let removed = cache.cleanup_expired().await;
        if removed > 0 {
            debug!("Auto cleanup removed {} expired entries", removed);
        }
    }
}

/// Spawn [`start_auto_cleanup`] when the memory tier enables it.
///
/// Returns `None` when the sweep is disabled or no tokio runtime is running.
pub fn spawn_auto_cleanup(cache: &Arc<TieredCache>) -> Option<JoinHandle<()>> {
    if !cache.memory.config.enable_auto_cleanup {
        return None;
    }

    let Ok(runtime) = Handle::try_current() else {
        warn!("No tokio runtime, automatic cache cleanup not started");
        return None;
    };
    Some(runtime.spawn(start_auto_cleanup(Arc::downgrade(cache))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::external::MemoryTierStore;

    fn write_through(name: &str) -> ExternalTierConfig {
        ExternalTierConfig::new(name).with_write_mode(WriteMode::WriteThrough)
    }

    fn three_tier() -> (TieredCache, Arc<MemoryTierStore>, Arc<MemoryTierStore>) {
        let l2 = Arc::new(MemoryTierStore::new());
        let l3 = Arc::new(MemoryTierStore::new());
        let cache = TieredCache::new(MemoryTierConfig::default())
            .unwrap()
            .with_tier(write_through("l2"), l2.clone())
            .with_tier(write_through("l3"), l3.clone());
        (cache, l2, l3)
    }

    #[tokio::test]
    async fn test_round_trip_and_expiry() {
        let cache = TieredCache::new(MemoryTierConfig::default()).unwrap();

        cache
            .set("k", "v".to_string(), Duration::from_millis(100))
            .await;
        assert_eq!(cache.get("k").await, Some("v".to_string()));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn test_zero_ttl_writes_nothing() {
        let (cache, l2, _) = three_tier();

        let report = cache.set("k", "v".to_string(), Duration::ZERO).await;
        assert!(report.written.is_empty());
        assert!(cache.get("k").await.is_none());
        assert_eq!(l2.occupancy().await, Some(0));
    }

    #[tokio::test]
    async fn test_set_writes_every_tier() {
        let (cache, l2, l3) = three_tier();

        let report = cache.set("k", "v".to_string(), Duration::from_secs(60)).await;
        assert_eq!(report.written, vec!["memory", "l2", "l3"]);
        assert!(report.is_clean());
        assert!(l2.get("k").await.unwrap().is_some());
        assert!(l3.get("k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_hit_in_slowest_tier_promotes() {
        let (cache, l2, l3) = three_tier();

        // Populate only tier 3 through a standalone tier handle
        let seed = ExternalTier::new(write_through("l3"), l3.clone());
        let entry = CacheEntry::new(
            "k".to_string(),
            "v".to_string(),
            Duration::from_secs(30),
            "l3",
        );
        assert!(seed.put(&entry).await);

        assert_eq!(cache.get("k").await, Some("v".to_string()));

        // Tier 2 now holds it with no more than the original remaining TTL
        let l2_tier = ExternalTier::new(write_through("l2"), l2.clone());
        let promoted = l2_tier.get("k").await.unwrap();
        assert!(promoted.metadata.expires_at <= entry.metadata.expires_at);

        // And the next read is served from memory
        assert_eq!(cache.get("k").await, Some("v".to_string()));
        let stats = cache.stats().await;
        assert_eq!(stats.promotions, 1);
        assert_eq!(stats.tier("memory").unwrap().hits, 1);
        assert_eq!(stats.tier("l3").unwrap().hits, 1);
    }

    #[tokio::test]
    async fn test_oversized_overwrite_is_served_from_slower_tier() {
        let l2 = Arc::new(MemoryTierStore::new());
        let cache = TieredCache::new(MemoryTierConfig::builder().max_size_bytes(32).build())
            .unwrap()
            .with_tier(write_through("l2"), l2.clone());
        let ttl = Duration::from_secs(60);
        let big = "x".repeat(64);

        cache.set("k", "old".to_string(), ttl).await;
        let report = cache.set("k", big.clone(), ttl).await;
        assert_eq!(report.failed, vec!["memory"]);
        assert_eq!(report.written, vec!["l2"]);

        assert_eq!(cache.get("k").await, Some(big));
    }

    #[tokio::test]
    async fn test_oversized_overwrite_without_other_tiers_misses() {
        let cache = TieredCache::new(MemoryTierConfig::builder().max_size_bytes(32).build()).unwrap();
        let ttl = Duration::from_secs(60);

        cache.set("k", "old".to_string(), ttl).await;
        cache.set("k", "x".repeat(64), ttl).await;

        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn test_unreachable_tier_degrades_to_miss() {
        let (cache, l2, _) = three_tier();
        l2.set_available(false);

        let report = cache.set("k", "v".to_string(), Duration::from_secs(60)).await;
        assert_eq!(report.failed, vec!["l2"]);
        assert_eq!(report.written, vec!["memory", "l3"]);

        cache.clear_memory().await;
        // l2 errors, l3 answers
        assert_eq!(cache.get("k").await, Some("v".to_string()));
        assert!(cache.stats().await.tier_failures >= 2);
    }

    #[tokio::test]
    async fn test_invalidate_is_idempotent() {
        let (cache, _, l3) = three_tier();
        cache.set("k", "v".to_string(), Duration::from_secs(60)).await;

        cache.invalidate("k").await;
        cache.invalidate("k").await;
        cache.invalidate("never-set").await;

        assert!(cache.get("k").await.is_none());
        assert!(l3.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_background_writes_land_eventually() {
        let l2 = Arc::new(MemoryTierStore::new());
        let cache = TieredCache::new(MemoryTierConfig::default())
            .unwrap()
            .with_tier(ExternalTierConfig::new("l2"), l2.clone());

        let report = cache.set("k", "v".to_string(), Duration::from_secs(60)).await;
        assert_eq!(report.deferred, vec!["l2"]);

        for _ in 0..50 {
            if l2.get("k").await.unwrap().is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("background write never reached tier 2");
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let cache = TieredCache::new(MemoryTierConfig::default()).unwrap();

        cache
            .set_json("nums", &vec![1u32, 2, 3], Duration::from_secs(60))
            .await
            .unwrap();
        let nums: Option<Vec<u32>> = cache.get_json("nums").await;
        assert_eq!(nums, Some(vec![1, 2, 3]));

        cache
            .set("bad", "{not json".to_string(), Duration::from_secs(60))
            .await;
        let bad: Option<Vec<u32>> = cache.get_json("bad").await;
        assert!(bad.is_none());
        // Corrupt entry was dropped
        assert!(cache.get("bad").await.is_none());
    }

    #[tokio::test]
    async fn test_auto_cleanup_sweeps_without_reads() {
        let config = MemoryTierConfig::builder()
            .cleanup_interval(Duration::from_millis(50))
            .build();
        let cache = Arc::new(TieredCache::new(config).unwrap());
        let handle = spawn_auto_cleanup(&cache).unwrap();

        cache.set("short", "v".to_string(), Duration::from_millis(30)).await;
        cache.set("long", "v".to_string(), Duration::from_secs(60)).await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        let memory = cache.stats().await.tiers.remove(0);
        assert_eq!(memory.entries, Some(1));
        assert_eq!(memory.expirations, 1);
        assert_eq!(memory.hits + memory.misses, 0);

        // The task ends with the cache
        drop(cache);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_auto_cleanup_disabled() {
        let config = MemoryTierConfig::builder().enable_auto_cleanup(false).build();
        let cache = Arc::new(TieredCache::new(config).unwrap());
        assert!(spawn_auto_cleanup(&cache).is_none());
    }

    #[tokio::test]
    async fn test_stats_hit_miss_counts() {
        let cache = TieredCache::new(MemoryTierConfig::default()).unwrap();
        cache.set("k", "v".to_string(), Duration::from_secs(60)).await;

        cache.get("k").await;
        cache.get("missing").await;

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.tiers.len(), 1);
        assert_eq!(stats.tiers[0].entries, Some(1));
    }
}

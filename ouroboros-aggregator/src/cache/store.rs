//! In-process memory tier with LRU eviction and a byte budget
//!
//! Eviction order is least-recently-used: both reads and writes move a key to
//! the back of the recency queue and eviction pops from the front. A write
//! that would push the tier over its byte or entry bound evicts until the new
//! entry fits. An entry larger than the whole byte budget is not stored.

use crate::cache::{
    config::MemoryTierConfig,
    entry::CacheEntry,
    types::{CacheKey, InvalidationReason, TierKind, TierStats},
};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Tier 1 of the tiered cache
///
/// Every operation takes the lock, mutates and releases without awaiting
/// anything else while holding it.
pub struct MemoryTier {
    pub(crate) config: MemoryTierConfig,

    store: Arc<RwLock<MemoryStore>>,
}

/// Internal storage
struct MemoryStore {
    /// Main storage: key -> entry
    entries: HashMap<CacheKey, CacheEntry>,

    /// LRU tracking: front is least recently used
    lru_queue: VecDeque<CacheKey>,

    /// Counters reported through `stats`
    stats: TierStats,

    /// Total size of cached data in bytes
    current_size_bytes: usize,
}

impl MemoryStore {
    fn touch(&mut self, key: &str) {
        self.lru_queue.retain(|k| k != key);
        self.lru_queue.push_back(key.to_string());
    }

    fn remove_entry(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.lru_queue.retain(|k| k != key);
        self.current_size_bytes = self
            .current_size_bytes
            .saturating_sub(entry.metadata.size_bytes);
        Some(entry)
    }
}

impl MemoryTier {
    /// Create a new memory tier with the given configuration
    pub fn new(config: MemoryTierConfig) -> Self {
        info!("Initializing memory cache tier with config: {:?}", config);

        let store = MemoryStore {
            entries: HashMap::new(),
            lru_queue: VecDeque::new(),
            stats: TierStats::new(config.name.clone(), TierKind::Memory),
            current_size_bytes: 0,
        };

        Self {
            config,
            store: Arc::new(RwLock::new(store)),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Store an entry, evicting older ones as needed.
    ///
    /// The entry's expiry is capped by the tier's TTL policy. Returns `false`
    /// when the entry was rejected because it can never fit. A rejected write
    /// still drops any older value under the same key, so the tier never
    /// serves a value older than the last write.
    pub async fn insert(&self, mut entry: CacheEntry) -> bool {
        let mut store = self.store.write().await;
        let key = entry.key.clone();

        let Some(remaining) = entry.remaining_ttl() else {
            debug!("Refusing to store already expired entry: {}", key);
            store.remove_entry(&key);
            return false;
        };
        entry.cap_ttl(self.config.effective_ttl(remaining));

        entry.metadata.size_bytes = entry.calculate_size();
        let needed = entry.metadata.size_bytes;

        if needed > self.config.max_size_bytes {
            warn!(
                "Entry {} ({} bytes) exceeds memory tier budget of {} bytes",
                key, needed, self.config.max_size_bytes
            );
            store.remove_entry(&key);
            return false;
        }

        // Replacing an entry frees its bytes first
        if store.remove_entry(&key).is_some() {
            debug!("Updating existing cache entry: {}", key);
        }

        self.evict_if_needed(&mut store, needed);

        store.entries.insert(key.clone(), entry);
        store.lru_queue.push_back(key);
        store.current_size_bytes += needed;

        true
    }

    /// Get a live entry, updating LRU order and access metadata
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        let mut store = self.store.write().await;

        let Some(expired) = store.entries.get(key).map(|entry| entry.is_expired()) else {
            store.stats.misses += 1;
            return None;
        };

        if expired {
            debug!("Cache entry expired ({}): {}", InvalidationReason::Expired, key);
            store.remove_entry(key);
            store.stats.expirations += 1;
            store.stats.misses += 1;
            return None;
        }

        store.touch(key);
        store.stats.hits += 1;

        let entry = store.entries.get_mut(key)?;
        entry.mark_accessed();
        Some(entry.clone())
    }

    /// Check if a live key exists (without updating access time)
    pub async fn contains_key(&self, key: &str) -> bool {
        let store = self.store.read().await;
        store
            .entries
            .get(key)
            .map(|entry| !entry.is_expired())
            .unwrap_or(false)
    }

    /// Remove a specific entry; a no-op for absent keys
    pub async fn remove(&self, key: &str) -> Option<CacheEntry> {
        let mut store = self.store.write().await;
        let removed = store.remove_entry(key);
        if removed.is_some() {
            debug!("Removed cache entry ({}): {}", InvalidationReason::Manual, key);
        }
        removed
    }

    /// Clear all entries from the tier
    pub async fn clear(&self) {
        let mut store = self.store.write().await;

        let count = store.entries.len();
        store.entries.clear();
        store.lru_queue.clear();
        store.current_size_bytes = 0;

        info!("Cleared {} entries from {} tier", count, self.config.name);
    }

    /// Remove all expired entries, returning how many were dropped
    pub async fn cleanup_expired(&self) -> usize {
        let mut store = self.store.write().await;

        let expired_keys: Vec<CacheKey> = store
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired_keys {
            store.remove_entry(key);
        }

        store.stats.expirations += expired_keys.len() as u64;
        if !expired_keys.is_empty() {
            debug!("Cleaned up {} expired entries", expired_keys.len());
        }

        expired_keys.len()
    }

    /// Snapshot of this tier's counters and occupancy
    pub async fn stats(&self) -> TierStats {
        let store = self.store.read().await;
        let mut stats = store.stats.clone();
        stats.entries = Some(store.entries.len());
        stats.size_bytes = Some(store.current_size_bytes);
        stats
    }

    /// Get current size in bytes
    pub async fn size_bytes(&self) -> usize {
        let store = self.store.read().await;
        store.current_size_bytes
    }

    /// Get number of entries (including not-yet-purged expired ones)
    pub async fn len(&self) -> usize {
        let store = self.store.read().await;
        store.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        let store = self.store.read().await;
        store.entries.is_empty()
    }

    /// Evict least recently used entries until `needed` more bytes and one
    /// more entry fit
    fn evict_if_needed(&self, store: &mut MemoryStore, needed: usize) {
        while store.entries.len() >= self.config.max_entries
            || store.current_size_bytes + needed > self.config.max_size_bytes
        {
            let Some(key) = store.lru_queue.pop_front() else {
                break;
            };

            debug!("Evicting entry ({}): {}", InvalidationReason::Evicted, key);
            if let Some(entry) = store.entries.remove(&key) {
                store.current_size_bytes = store
                    .current_size_bytes
                    .saturating_sub(entry.metadata.size_bytes);
                store.stats.evictions += 1;
            }
        }
    }
}

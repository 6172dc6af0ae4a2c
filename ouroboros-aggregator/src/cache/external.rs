//! External cache tiers (tier 2, 3, ...)
//!
//! An external tier wraps a [`TierStore`], a minimal byte-oriented key-value
//! store with TTL support. Entries are stored as a small JSON envelope that
//! carries the absolute expiry, so a value read back from a slower tier keeps
//! its remaining TTL when it is promoted. Store errors never escape this
//! module: a failed `get` is a miss and a failed `set`/`delete` is a no-op.

use crate::cache::{
    config::ExternalTierConfig,
    entry::CacheEntry,
    types::{CacheValue, TierKind, TierStats},
};
use crate::error::{AggregatorError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Contract for an external key-value store backing a cache tier
#[async_trait]
pub trait TierStore: Send + Sync {
    /// Fetch raw bytes, `None` when absent
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store raw bytes for `ttl_seconds`
    async fn set(&self, key: &str, value: Vec<u8>, ttl_seconds: u64) -> Result<()>;

    /// Remove a key; absent keys are not an error
    async fn delete(&self, key: &str) -> Result<()>;

    /// Number of stored keys, if the store can tell cheaply
    async fn occupancy(&self) -> Option<usize> {
        None
    }
}

/// TTL-aware in-process [`TierStore`], for development and tests
pub struct MemoryTierStore {
    entries: RwLock<HashMap<String, (Vec<u8>, Instant)>>,
    available: AtomicBool,
}

impl Default for MemoryTierStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTierStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the store going down or coming back
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AggregatorError::tier("memory-store", "store unavailable"))
        }
    }
}

#[async_trait]
impl TierStore for MemoryTierStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_available()?;
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|(_, expires)| Instant::now() < *expires)
            .map(|(bytes, _)| bytes.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl_seconds: u64) -> Result<()> {
        self.check_available()?;
        let expires = Instant::now() + Duration::from_secs(ttl_seconds);
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), (value, expires));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_available()?;
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }

    async fn occupancy(&self) -> Option<usize> {
        let entries = self.entries.read().await;
        let now = Instant::now();
        Some(entries.values().filter(|(_, expires)| now < *expires).count())
    }
}

/// Envelope written to external stores
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    value: CacheValue,
    origin_tier: String,
    inserted_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    failures: AtomicU64,
}

/// A cache tier backed by a [`TierStore`]
pub struct ExternalTier {
    pub(crate) config: ExternalTierConfig,
    store: Arc<dyn TierStore>,
    counters: TierCounters,
}

impl ExternalTier {
    pub fn new(config: ExternalTierConfig, store: Arc<dyn TierStore>) -> Self {
        Self {
            config,
            store,
            counters: TierCounters::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Read a live entry; store errors and corrupt envelopes degrade to a miss
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        let bytes = match self.store.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Err(e) => {
                self.record_failure("get", key, &e);
                return None;
            }
        };

        let stored: StoredEntry = match serde_json::from_slice(&bytes) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(tier = %self.config.name, key, "Discarding undecodable cache envelope: {}", e);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let mut entry = CacheEntry::with_expiration(
            key.to_string(),
            stored.value,
            stored.expires_at,
            &stored.origin_tier,
        );
        entry.metadata.inserted_at = stored.inserted_at;

        if entry.is_expired() {
            debug!(tier = %self.config.name, key, "External entry past its expiry");
            self.counters.expirations.fetch_add(1, Ordering::Relaxed);
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry)
    }

    /// Write an entry with its remaining TTL truncated to this tier's cap.
    /// Returns whether the store accepted it.
    pub async fn put(&self, entry: &CacheEntry) -> bool {
        let Some(remaining) = entry.remaining_ttl() else {
            return false;
        };

        let ttl = self.config.effective_ttl(remaining);
        if ttl.is_zero() {
            return false;
        }

        let expires_at = entry
            .metadata
            .expires_at
            .min(Utc::now() + crate::cache::entry::to_chrono(ttl));
        let stored = StoredEntry {
            value: entry.value.clone(),
            origin_tier: entry.metadata.origin_tier.clone(),
            inserted_at: Utc::now(),
            expires_at,
        };

        let bytes = match serde_json::to_vec(&stored) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.record_failure("encode", &entry.key, &e.into());
                return false;
            }
        };

        match self.store.set(&entry.key, bytes, ttl_seconds(ttl)).await {
            Ok(()) => {
                debug!(tier = %self.config.name, key = %entry.key, "Stored entry for {:?}", ttl);
                true
            }
            Err(e) => {
                self.record_failure("set", &entry.key, &e);
                false
            }
        }
    }

    /// Delete a key; failures are logged and counted
    pub async fn remove(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            self.record_failure("delete", key, &e);
        }
    }

    pub fn failures(&self) -> u64 {
        self.counters.failures.load(Ordering::Relaxed)
    }

    pub async fn stats(&self) -> TierStats {
        let mut stats = TierStats::new(self.config.name.clone(), TierKind::External);
        stats.hits = self.counters.hits.load(Ordering::Relaxed);
        stats.misses = self.counters.misses.load(Ordering::Relaxed);
        stats.expirations = self.counters.expirations.load(Ordering::Relaxed);
        stats.failures = self.failures();
        stats.entries = self.store.occupancy().await;
        stats
    }

    fn record_failure(&self, operation: &str, key: &str, error: &AggregatorError) {
        self.counters.failures.fetch_add(1, Ordering::Relaxed);
        warn!(
            tier = %self.config.name,
            operation,
            key,
            "Cache tier operation failed, degrading: {}",
            error
        );
    }
}

/// Whole seconds for the store contract, rounded up so the store never
/// drops an entry before its envelope expiry
fn ttl_seconds(ttl: Duration) -> u64 {
    (ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0)).max(1)
}

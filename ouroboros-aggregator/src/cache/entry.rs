//! Cache entry management with TTL support

use crate::cache::types::{CacheKey, CacheValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A cache entry with an absolute expiry
///
/// Visible to readers iff `now < expires_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The cache key (query fingerprint or raw token)
    pub key: CacheKey,

    /// The serialized payload
    pub value: CacheValue,

    /// Entry metadata
    pub metadata: CacheMetadata,
}

impl CacheEntry {
    /// Create a new entry expiring `ttl` from now
    pub fn new(key: CacheKey, value: CacheValue, ttl: Duration, origin_tier: &str) -> Self {
        let now = Utc::now();
        let expires_at = now + to_chrono(ttl);
        Self::with_expiration(key, value, expires_at, origin_tier)
    }

    /// Create a new entry with a fixed expiration time
    pub fn with_expiration(
        key: CacheKey,
        value: CacheValue,
        expires_at: DateTime<Utc>,
        origin_tier: &str,
    ) -> Self {
        let now = Utc::now();

        Self {
            key,
            value,
            metadata: CacheMetadata {
                origin_tier: origin_tier.to_string(),
                inserted_at: now,
                accessed_at: now,
                expires_at,
                access_count: 0,
                size_bytes: 0, // Calculated on insert
            },
        }
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.metadata.expires_at
    }

    /// Time left before expiry, `None` once expired
    pub fn remaining_ttl(&self) -> Option<Duration> {
        let now = Utc::now();
        if now >= self.metadata.expires_at {
            None
        } else {
            (self.metadata.expires_at - now).to_std().ok()
        }
    }

    /// Mark the entry as accessed (updates access time and count)
    pub fn mark_accessed(&mut self) {
        self.metadata.accessed_at = Utc::now();
        self.metadata.access_count += 1;
    }

    /// Get the age of the entry
    pub fn age(&self) -> Duration {
        (Utc::now() - self.metadata.inserted_at)
            .to_std()
            .unwrap_or(Duration::from_secs(0))
    }

    /// Bytes charged against the memory tier budget: key plus payload
    pub fn calculate_size(&self) -> usize {
        self.key.len() + self.value.len()
    }

    /// Pull the expiry in so the entry lives at most `cap` from now
    pub fn cap_ttl(&mut self, cap: Duration) {
        let capped = Utc::now() + to_chrono(cap);
        if capped < self.metadata.expires_at {
            self.metadata.expires_at = capped;
        }
    }
}

/// Metadata associated with a cache entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// Tier that first stored this value
    pub origin_tier: String,

    /// When the entry was written to its current tier
    pub inserted_at: DateTime<Utc>,

    /// Last access time (for LRU tracking)
    pub accessed_at: DateTime<Utc>,

    /// When the entry expires
    pub expires_at: DateTime<Utc>,

    /// Number of times this entry has been read
    pub access_count: u64,

    /// Size of the entry in bytes
    pub size_bytes: usize,
}

/// Converts a TTL, saturating at roughly a century
pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    let ceiling = chrono::Duration::days(36_500);
    chrono::Duration::from_std(duration)
        .map(|d| d.min(ceiling))
        .unwrap_or(ceiling)
}

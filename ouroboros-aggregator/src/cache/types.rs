//! Core type definitions for the cache system

use serde::{Deserialize, Serialize};
use std::fmt;

/// Cache key type
pub type CacheKey = String;

/// Cache value type - stores serialized payloads
pub type CacheValue = String;

/// Kind of storage backing a tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TierKind {
    /// Tier 1: bounded in-process memory
    Memory,

    /// Tiers 2+: external key-value store with TTL support
    External,
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TierKind::Memory => write!(f, "memory"),
            TierKind::External => write!(f, "external"),
        }
    }
}

/// Why an entry left the memory tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationReason {
    /// Entry expired based on TTL
    Expired,

    /// Evicted to make room under the byte or entry bound
    Evicted,

    /// Explicit invalidation by key
    Manual,

    /// Payload could not be decoded
    Corrupt,
}

impl fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidationReason::Expired => write!(f, "TTL expired"),
            InvalidationReason::Evicted => write!(f, "LRU eviction"),
            InvalidationReason::Manual => write!(f, "manual invalidation"),
            InvalidationReason::Corrupt => write!(f, "corrupt payload"),
        }
    }
}

/// Per-tier counters and occupancy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierStats {
    /// Tier name (e.g. "memory", "redis")
    pub name: String,

    pub kind: TierKind,

    /// Hits served by this tier
    pub hits: u64,

    /// Probes that found nothing in this tier
    pub misses: u64,

    /// Entries currently stored, when the tier can report it
    pub entries: Option<usize>,

    /// Bytes currently stored, when the tier can report it
    pub size_bytes: Option<usize>,

    /// Entries removed to respect capacity bounds
    pub evictions: u64,

    /// Entries dropped because their TTL ran out
    pub expirations: u64,

    /// Store errors that were degraded to miss/no-op
    pub failures: u64,
}

impl TierStats {
    pub fn new(name: impl Into<String>, kind: TierKind) -> Self {
        Self {
            name: name.into(),
            kind,
            hits: 0,
            misses: 0,
            entries: None,
            size_bytes: None,
            evictions: 0,
            expirations: 0,
            failures: 0,
        }
    }
}

/// Statistics and metrics for cache performance monitoring
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheStats {
    /// `get` calls answered by any tier
    pub hits: u64,

    /// `get` calls no tier could answer
    pub misses: u64,

    /// Capacity evictions across all tiers
    pub evictions: u64,

    /// Values copied into faster tiers after a slower-tier hit
    pub promotions: u64,

    /// Tier errors that were contained
    pub tier_failures: u64,

    /// Per-tier breakdown, fastest first
    pub tiers: Vec<TierStats>,
}

impl CacheStats {
    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Calculate miss rate as a percentage
    pub fn miss_rate(&self) -> f64 {
        100.0 - self.hit_rate()
    }

    /// Stats for a named tier
    pub fn tier(&self, name: &str) -> Option<&TierStats> {
        self.tiers.iter().find(|t| t.name == name)
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, misses: {}, hit_rate: {:.2}%, evictions: {}, promotions: {}, tier_failures: {}, tiers: {} }}",
            self.hits,
            self.misses,
            self.hit_rate(),
            self.evictions,
            self.promotions,
            self.tier_failures,
            self.tiers.len()
        )
    }
}

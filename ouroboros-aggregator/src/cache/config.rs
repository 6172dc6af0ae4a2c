//! Configuration for the tiered cache

use crate::error::{AggregatorError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the in-process memory tier (tier 1)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryTierConfig {
    /// Tier name reported in stats and logs
    pub name: String,

    /// Maximum total size of keys plus payloads in bytes
    pub max_size_bytes: usize,

    /// Maximum number of entries
    pub max_entries: usize,

    /// Upper bound on any TTL written to this tier
    pub max_ttl: Option<Duration>,

    /// Downward-only TTL jitter factor (0.0 - 1.0).
    /// A requested TTL is shortened by up to this fraction, never extended.
    pub ttl_jitter: f64,

    /// Enable the background expiry sweep
    pub enable_auto_cleanup: bool,

    /// Interval for the background expiry sweep
    pub cleanup_interval: Duration,
}

impl Default for MemoryTierConfig {
    fn default() -> Self {
        Self {
            name: "memory".to_string(),
            // 64 MB
            max_size_bytes: 64 * 1024 * 1024,
            max_entries: 10_000,
            max_ttl: None,
            ttl_jitter: 0.0,
            enable_auto_cleanup: true,
            // Sweep every 5 minutes
            cleanup_interval: Duration::from_secs(300),
        }
    }
}

impl MemoryTierConfig {
    /// Create a new builder for memory tier configuration
    pub fn builder() -> MemoryTierConfigBuilder {
        MemoryTierConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(AggregatorError::ConfigurationError(
                "memory tier max_entries must be greater than 0".to_string(),
            ));
        }

        if self.max_size_bytes == 0 {
            return Err(AggregatorError::ConfigurationError(
                "memory tier max_size_bytes must be greater than 0".to_string(),
            ));
        }

        if self.enable_auto_cleanup && self.cleanup_interval.is_zero() {
            return Err(AggregatorError::ConfigurationError(
                "cleanup_interval must be greater than 0 when auto cleanup is enabled".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.ttl_jitter) {
            return Err(AggregatorError::ConfigurationError(
                "ttl_jitter must be between 0.0 and 1.0".to_string(),
            ));
        }

        Ok(())
    }

    /// Apply the TTL cap, then jitter. The result is never longer than `requested`.
    pub fn effective_ttl(&self, requested: Duration) -> Duration {
        let capped = match self.max_ttl {
            Some(cap) => requested.min(cap),
            None => requested,
        };

        if self.ttl_jitter == 0.0 {
            return capped;
        }

        let shave = rand::random::<f64>() * self.ttl_jitter;
        capped.mul_f64(1.0 - shave)
    }

    /// Small footprint preset used by the identity cache
    pub fn small() -> Self {
        Self {
            name: "identity".to_string(),
            // 4 MB
            max_size_bytes: 4 * 1024 * 1024,
            max_entries: 1_000,
            cleanup_interval: Duration::from_secs(60),
            ..Default::default()
        }
    }
}

/// Builder for memory tier configuration
#[derive(Debug, Default)]
pub struct MemoryTierConfigBuilder {
    name: Option<String>,
    max_size_bytes: Option<usize>,
    max_entries: Option<usize>,
    max_ttl: Option<Duration>,
    ttl_jitter: Option<f64>,
    enable_auto_cleanup: Option<bool>,
    cleanup_interval: Option<Duration>,
}

impl MemoryTierConfigBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set maximum tier size in bytes
    pub fn max_size_bytes(mut self, size: usize) -> Self {
        self.max_size_bytes = Some(size);
        self
    }

    /// Set maximum number of entries
    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    /// Cap every TTL written to this tier
    pub fn max_ttl(mut self, ttl: Duration) -> Self {
        self.max_ttl = Some(ttl);
        self
    }

    /// Set TTL jitter factor (0.0 - 1.0)
    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    /// Enable or disable automatic cleanup
    pub fn enable_auto_cleanup(mut self, enable: bool) -> Self {
        self.enable_auto_cleanup = Some(enable);
        self
    }

    /// Set cleanup interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    /// Build the memory tier configuration
    pub fn build(self) -> MemoryTierConfig {
        let defaults = MemoryTierConfig::default();

        MemoryTierConfig {
            name: self.name.unwrap_or(defaults.name),
            max_size_bytes: self.max_size_bytes.unwrap_or(defaults.max_size_bytes),
            max_entries: self.max_entries.unwrap_or(defaults.max_entries),
            max_ttl: self.max_ttl.or(defaults.max_ttl),
            ttl_jitter: self.ttl_jitter.unwrap_or(defaults.ttl_jitter),
            enable_auto_cleanup: self
                .enable_auto_cleanup
                .unwrap_or(defaults.enable_auto_cleanup),
            cleanup_interval: self.cleanup_interval.unwrap_or(defaults.cleanup_interval),
        }
    }
}

/// How writes reach an external tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Awaited inside `set`; failures are still contained
    WriteThrough,
    /// Spawned as a background task; failures are only counted
    #[default]
    Background,
}

/// Configuration for an external tier (tier 2, 3, ...)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalTierConfig {
    /// Tier name reported in stats and logs
    pub name: String,

    /// Upper bound on any TTL written to this tier
    pub max_ttl: Option<Duration>,

    pub write_mode: WriteMode,
}

impl ExternalTierConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_ttl: None,
            write_mode: WriteMode::default(),
        }
    }

    pub fn with_max_ttl(mut self, ttl: Duration) -> Self {
        self.max_ttl = Some(ttl);
        self
    }

    pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.write_mode = mode;
        self
    }

    /// Truncate a TTL to this tier's cap
    pub fn effective_ttl(&self, requested: Duration) -> Duration {
        match self.max_ttl {
            Some(cap) => requested.min(cap),
            None => requested,
        }
    }
}

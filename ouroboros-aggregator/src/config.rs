//! Aggregator configuration
//!
//! Built in code through [`AggregatorConfig::builder`] or read from the
//! environment (and an optional `.env` file) with [`AggregatorConfig::from_env`].

use crate::cache::{ExternalTierConfig, MemoryTierConfig, TierStore, TieredCache};
use crate::error::{AggregatorError, Result};
use crate::fanout::DEFAULT_BACKEND_TIMEOUT;
use crate::health::DEFAULT_DEGRADED_THRESHOLD_MS;
use crate::query::DEFAULT_RESULT_LIMIT;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const ENV_BACKEND_TIMEOUT_MS: &str = "AGGREGATOR_BACKEND_TIMEOUT_MS";
pub const ENV_DEFAULT_LIMIT: &str = "AGGREGATOR_DEFAULT_LIMIT";
pub const ENV_AGGRESSIVE_TTL_SECS: &str = "AGGREGATOR_AGGRESSIVE_TTL_SECS";
pub const ENV_CONSERVATIVE_TTL_SECS: &str = "AGGREGATOR_CONSERVATIVE_TTL_SECS";
pub const ENV_IDENTITY_TTL_SECS: &str = "AGGREGATOR_IDENTITY_TTL_SECS";
pub const ENV_MEMORY_MAX_BYTES: &str = "AGGREGATOR_MEMORY_MAX_BYTES";

/// Layout of the tiered result cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TieredCacheConfig {
    pub memory: MemoryTierConfig,
    /// Slower tiers in probe order
    #[serde(default)]
    pub external: Vec<ExternalTierConfig>,
}

impl TieredCacheConfig {
    pub fn with_external(mut self, tier: ExternalTierConfig) -> Self {
        self.external.push(tier);
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.memory.validate()?;

        let mut names = vec![self.memory.name.as_str()];
        for tier in &self.external {
            if tier.name.trim().is_empty() {
                return Err(AggregatorError::ConfigurationError(
                    "external tier name must not be empty".to_string(),
                ));
            }
            if names.contains(&tier.name.as_str()) {
                return Err(AggregatorError::ConfigurationError(format!(
                    "duplicate cache tier name: {}",
                    tier.name
                )));
            }
            names.push(&tier.name);
        }
        Ok(())
    }

    /// Build the cache, pairing each external tier config with a store in order
    pub fn build(&self, stores: Vec<Arc<dyn TierStore>>) -> Result<TieredCache> {
        self.validate()?;
        if stores.len() != self.external.len() {
            return Err(AggregatorError::ConfigurationError(format!(
                "{} external tier(s) configured but {} store(s) supplied",
                self.external.len(),
                stores.len()
            )));
        }

        let mut cache = TieredCache::new(self.memory.clone())?;
        for (tier, store) in self.external.iter().zip(stores) {
            cache = cache.with_tier(tier.clone(), store);
        }
        Ok(cache)
    }
}

/// Aggregator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Time budget for each backend call and health probe
    pub backend_timeout: Duration,

    /// Result limit applied to queries built by the aggregator
    pub default_limit: usize,

    /// Cache TTL for the aggressive strategy
    pub aggressive_ttl: Duration,

    /// Cache TTL for the conservative strategy
    pub conservative_ttl: Duration,

    /// Upper bound on how long a validated identity is cached
    pub identity_ttl: Duration,

    /// Health probes slower than this are reported as degraded
    pub degraded_threshold_ms: u64,

    pub cache: TieredCacheConfig,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            backend_timeout: DEFAULT_BACKEND_TIMEOUT,
            default_limit: DEFAULT_RESULT_LIMIT,
            // 1 hour
            aggressive_ttl: Duration::from_secs(3600),
            // 30 minutes
            conservative_ttl: Duration::from_secs(1800),
            // 5 minutes
            identity_ttl: Duration::from_secs(300),
            degraded_threshold_ms: DEFAULT_DEGRADED_THRESHOLD_MS,
            cache: TieredCacheConfig::default(),
        }
    }
}

impl AggregatorConfig {
    pub fn builder() -> AggregatorConfigBuilder {
        AggregatorConfigBuilder::default()
    }

    /// Defaults overridden by `AGGREGATOR_*` environment variables.
    /// A `.env` file in the working directory is loaded first if present.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(ms) = parse_var::<u64>(&lookup, ENV_BACKEND_TIMEOUT_MS)? {
            config.backend_timeout = Duration::from_millis(ms);
        }
        if let Some(limit) = parse_var::<usize>(&lookup, ENV_DEFAULT_LIMIT)? {
            config.default_limit = limit;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_AGGRESSIVE_TTL_SECS)? {
            config.aggressive_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_CONSERVATIVE_TTL_SECS)? {
            config.conservative_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_IDENTITY_TTL_SECS)? {
            config.identity_ttl = Duration::from_secs(secs);
        }
        if let Some(bytes) = parse_var::<usize>(&lookup, ENV_MEMORY_MAX_BYTES)? {
            config.cache.memory.max_size_bytes = bytes;
        }

        config.validate()?;
        debug!(?config, "Loaded aggregator configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.backend_timeout.is_zero() {
            return Err(AggregatorError::ConfigurationError(
                "backend_timeout must be greater than 0".to_string(),
            ));
        }

        if self.default_limit == 0 {
            return Err(AggregatorError::ConfigurationError(
                "default_limit must be greater than 0".to_string(),
            ));
        }

        // A zero strategy TTL would silently turn that strategy into realtime
        if self.aggressive_ttl.is_zero() || self.conservative_ttl.is_zero() {
            return Err(AggregatorError::ConfigurationError(
                "aggressive_ttl and conservative_ttl must be greater than 0".to_string(),
            ));
        }

        if self.identity_ttl.is_zero() {
            return Err(AggregatorError::ConfigurationError(
                "identity_ttl must be greater than 0".to_string(),
            ));
        }

        self.cache.validate()
    }

    /// Short TTLs and a small memory tier, for tests and local runs
    pub fn development() -> Self {
        Self {
            backend_timeout: Duration::from_secs(2),
            aggressive_ttl: Duration::from_secs(60),
            conservative_ttl: Duration::from_secs(30),
            identity_ttl: Duration::from_secs(30),
            cache: TieredCacheConfig {
                memory: MemoryTierConfig::builder()
                    .max_size_bytes(8 * 1024 * 1024)
                    .max_entries(1_000)
                    .cleanup_interval(Duration::from_secs(30))
                    .build(),
                external: Vec::new(),
            },
            ..Default::default()
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            AggregatorError::ConfigurationError(format!("{} has invalid value '{}': {}", name, raw, e))
        }),
    }
}

/// Builder for [`AggregatorConfig`]
#[derive(Debug, Default)]
pub struct AggregatorConfigBuilder {
    backend_timeout: Option<Duration>,
    default_limit: Option<usize>,
    aggressive_ttl: Option<Duration>,
    conservative_ttl: Option<Duration>,
    identity_ttl: Option<Duration>,
    degraded_threshold_ms: Option<u64>,
    cache: Option<TieredCacheConfig>,
}

impl AggregatorConfigBuilder {
    pub fn backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = Some(timeout);
        self
    }

    pub fn default_limit(mut self, limit: usize) -> Self {
        self.default_limit = Some(limit);
        self
    }

    pub fn aggressive_ttl(mut self, ttl: Duration) -> Self {
        self.aggressive_ttl = Some(ttl);
        self
    }

    pub fn conservative_ttl(mut self, ttl: Duration) -> Self {
        self.conservative_ttl = Some(ttl);
        self
    }

    pub fn identity_ttl(mut self, ttl: Duration) -> Self {
        self.identity_ttl = Some(ttl);
        self
    }

    pub fn degraded_threshold_ms(mut self, threshold: u64) -> Self {
        self.degraded_threshold_ms = Some(threshold);
        self
    }

    pub fn cache(mut self, cache: TieredCacheConfig) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn build(self) -> AggregatorConfig {
        let defaults = AggregatorConfig::default();

        AggregatorConfig {
            backend_timeout: self.backend_timeout.unwrap_or(defaults.backend_timeout),
            default_limit: self.default_limit.unwrap_or(defaults.default_limit),
            aggressive_ttl: self.aggressive_ttl.unwrap_or(defaults.aggressive_ttl),
            conservative_ttl: self.conservative_ttl.unwrap_or(defaults.conservative_ttl),
            identity_ttl: self.identity_ttl.unwrap_or(defaults.identity_ttl),
            degraded_threshold_ms: self
                .degraded_threshold_ms
                .unwrap_or(defaults.degraded_threshold_ms),
            cache: self.cache.unwrap_or(defaults.cache),
        }
    }
}

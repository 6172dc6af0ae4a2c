//! Query model shared by the cache key codec, the backends and the aggregator

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of merged records returned per query
pub const DEFAULT_RESULT_LIMIT: usize = 10;

/// Per-request cache policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStrategy {
    /// Long-lived cache entries (1 hour by default)
    Aggressive,
    /// Shorter-lived cache entries (30 minutes by default)
    #[default]
    Conservative,
    /// Bypass the cache entirely, never read or written
    Realtime,
}

impl CacheStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aggressive => "aggressive",
            Self::Conservative => "conservative",
            Self::Realtime => "realtime",
        }
    }

    /// Whether the cache is consulted at all under this strategy
    pub fn uses_cache(&self) -> bool {
        !matches!(self, Self::Realtime)
    }

    /// TTL applied when storing a fresh result, given the configured windows
    pub fn ttl(&self, aggressive: Duration, conservative: Duration) -> Duration {
        match self {
            Self::Aggressive => aggressive,
            Self::Conservative => conservative,
            Self::Realtime => Duration::ZERO,
        }
    }
}

impl std::fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CacheStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aggressive" => Ok(Self::Aggressive),
            "conservative" => Ok(Self::Conservative),
            "realtime" => Ok(Self::Realtime),
            other => Err(format!("unknown cache strategy: {}", other)),
        }
    }
}

/// Structured filters narrowing a query
///
/// An absent filter set and an empty one are equivalent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryFilters {
    /// Accepted content types (empty = any)
    #[serde(default)]
    pub content_types: Vec<String>,
    /// Backends to consult (empty = all)
    #[serde(default)]
    pub sources: Vec<String>,
    /// Owner of the knowledge being searched
    #[serde(default)]
    pub user_id: Option<String>,
    /// Records below this confidence are dropped
    #[serde(default)]
    pub min_confidence: Option<f64>,
}

impl QueryFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_types.push(content_type.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.sources.push(source.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = Some(min_confidence);
        self
    }

    /// True when no filter narrows anything
    pub fn is_empty(&self) -> bool {
        self.content_types.is_empty()
            && self.sources.is_empty()
            && self.user_id.is_none()
            && self.min_confidence.map_or(true, |c| c <= 0.0)
    }

    /// Whether a backend is selected by the `sources` filter
    pub fn allows_source(&self, backend: &str) -> bool {
        self.sources.is_empty() || self.sources.iter().any(|s| s == backend)
    }

    /// Whether a record's content type passes the `content_types` filter.
    /// Records without a declared type always pass.
    pub fn allows_content_type(&self, content_type: Option<&str>) -> bool {
        match content_type {
            Some(ct) if !self.content_types.is_empty() => self
                .content_types
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(ct)),
            _ => true,
        }
    }
}

/// Result-shaping options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Maximum number of merged records returned
    pub limit: usize,
    /// Annotate records with the other backends that also returned them
    pub cross_reference: bool,
    /// Cache policy for this request
    pub cache_strategy: CacheStrategy,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_RESULT_LIMIT,
            cross_reference: false,
            cache_strategy: CacheStrategy::default(),
        }
    }
}

/// A knowledge query; immutable once built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    #[serde(default)]
    pub filters: Option<QueryFilters>,
    #[serde(default)]
    pub options: QueryOptions,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            filters: None,
            options: QueryOptions::default(),
        }
    }

    pub fn with_filters(mut self, filters: QueryFilters) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.options.limit = limit;
        self
    }

    pub fn with_cross_reference(mut self, cross_reference: bool) -> Self {
        self.options.cross_reference = cross_reference;
        self
    }

    pub fn with_strategy(mut self, strategy: CacheStrategy) -> Self {
        self.options.cache_strategy = strategy;
        self
    }

    /// Filters with "missing" normalized to "empty"
    pub fn filters(&self) -> QueryFilters {
        self.filters.clone().unwrap_or_default()
    }

    pub fn strategy(&self) -> CacheStrategy {
        self.options.cache_strategy
    }

    /// Lower-cased query terms used by lexical relevance scoring
    pub fn terms(&self) -> Vec<String> {
        self.text
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect()
    }
}

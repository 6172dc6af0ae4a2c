//! Deterministic cache keys for queries
//!
//! `fingerprint` canonicalizes query text and filters and hashes the result
//! with SHA-256. Canonical form:
//! - text is lower-cased, trimmed, inner whitespace collapsed to one space
//! - content types are lower-cased, sorted and de-duplicated
//! - sources are sorted and de-duplicated
//! - an empty user id is absent; a non-positive or NaN min confidence is absent
//!
//! Collisions between different queries only cost cache efficiency: every
//! cached aggregate carries the query text it was computed for.

use crate::cache::types::CacheKey;
use crate::query::{Query, QueryFilters};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Lower-case and collapse whitespace
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(|t| t.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Fingerprint of query text plus filters; `None` filters equal empty ones
pub fn fingerprint(text: &str, filters: Option<&QueryFilters>) -> String {
    let empty = QueryFilters::default();
    let filters = filters.unwrap_or(&empty);

    let content_types: BTreeSet<String> = filters
        .content_types
        .iter()
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty())
        .collect();
    let sources: BTreeSet<&str> = filters
        .sources
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    let user_id = filters
        .user_id
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty());
    let min_confidence = filters.min_confidence.filter(|c| *c > 0.0);

    let mut hasher = Sha256::new();
    hasher.update(b"text=");
    hasher.update(normalize_text(text).as_bytes());
    hasher.update(b"\n");
    for content_type in &content_types {
        hasher.update(b"content_type=");
        hasher.update(content_type.as_bytes());
        hasher.update(b"\n");
    }
    for source in &sources {
        hasher.update(b"source=");
        hasher.update(source.as_bytes());
        hasher.update(b"\n");
    }
    if let Some(user_id) = user_id {
        hasher.update(b"user_id=");
        hasher.update(user_id.as_bytes());
        hasher.update(b"\n");
    }
    if let Some(min_confidence) = min_confidence {
        hasher.update(b"min_confidence=");
        hasher.update(min_confidence.to_bits().to_be_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Fingerprint of a full query (text and filters only)
pub fn query_fingerprint(query: &Query) -> String {
    fingerprint(&query.text, query.filters.as_ref())
}

/// Stable hash of normalized content, used to dedup records without an id
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_text(content).as_bytes());
    hex::encode(hasher.finalize())
}

/// Namespace a key lives in
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyNamespace {
    /// Merged aggregate results
    Aggregate,

    /// Custom namespace
    Custom(String),
}

impl std::fmt::Display for KeyNamespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyNamespace::Aggregate => write!(f, "aggregate"),
            KeyNamespace::Custom(s) => write!(f, "custom:{}", s),
        }
    }
}

/// Cache key builder: `<namespace>:<identifier>?<k>=<v>&...`
pub struct CacheKeyBuilder {
    namespace: KeyNamespace,
    identifier: String,
    params: Vec<(String, String)>,
}

impl CacheKeyBuilder {
    /// Create a new cache key builder
    pub fn new(namespace: KeyNamespace) -> Self {
        Self {
            namespace,
            identifier: String::new(),
            params: Vec::new(),
        }
    }

    /// Set the primary identifier
    pub fn identifier(mut self, id: impl Into<String>) -> Self {
        self.identifier = id.into();
        self
    }

    /// Add a parameter to the key
    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }

    /// Build the cache key
    pub fn build(self) -> CacheKey {
        let mut key = format!("{}:{}", self.namespace, self.identifier);

        if !self.params.is_empty() {
            let params_str: Vec<String> = self
                .params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            key.push_str(&format!("?{}", params_str.join("&")));
        }

        key
    }
}

/// Storage key for a query's aggregate: the fingerprint plus the options
/// that change the stored value (limit and cross referencing).
/// The cache strategy is deliberately not part of the key.
pub fn aggregate_key(query: &Query) -> CacheKey {
    CacheKeyBuilder::new(KeyNamespace::Aggregate)
        .identifier(query_fingerprint(query))
        .param("limit", query.options.limit)
        .param("xref", u8::from(query.options.cross_reference))
        .build()
}

//! Knowledge backend contract and the normalized record every backend returns
//!
//! Backends (document store, graph store, cloud memory, ...) normalize their
//! native result shapes into [`KnowledgeRecord`] at their own boundary, so the
//! merger only ever sees one shape.

use crate::error::Result;
use crate::query::Query;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata key holding a record's content type
pub const CONTENT_TYPE_KEY: &str = "content_type";

/// A single normalized search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeRecord {
    /// Backend-assigned identifier, if the backend has one
    #[serde(default)]
    pub id: Option<String>,
    pub content: String,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Name of the backend that produced the record
    #[serde(default)]
    pub backend: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Other backends that returned a duplicate of this record.
    /// Only filled when cross referencing is requested.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub also_found_in: Vec<String>,
}

impl KnowledgeRecord {
    /// New record; confidence is clamped to [0, 1] and NaN becomes 0
    pub fn new(content: impl Into<String>, confidence: f64) -> Self {
        Self {
            id: None,
            content: content.into(),
            confidence: clamp_confidence(confidence),
            backend: String::new(),
            metadata: BTreeMap::new(),
            timestamp: None,
            also_found_in: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_content_type(self, content_type: impl Into<String>) -> Self {
        self.with_metadata(CONTENT_TYPE_KEY, content_type.into())
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Declared content type, if any
    pub fn content_type(&self) -> Option<&str> {
        self.metadata.get(CONTENT_TYPE_KEY).and_then(|v| v.as_str())
    }

    /// Id to dedup by; empty ids count as absent
    pub fn dedup_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.trim().is_empty())
    }
}

pub(crate) fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

/// An independently failing knowledge source
#[async_trait]
pub trait KnowledgeBackend: Send + Sync {
    /// Stable name used for tagging, filtering and reporting
    fn name(&self) -> &str;

    /// Run the query; must not depend on other backends
    async fn search(&self, query: &Query) -> Result<Vec<KnowledgeRecord>>;

    /// Liveness probe; healthy unless the backend says otherwise
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

//! Backend health checks
//!
//! Each backend is probed through [`KnowledgeBackend::health_check`] under
//! the backend timeout. Probes run concurrently and a slow but successful
//! probe is reported as degraded.

use crate::backend::KnowledgeBackend;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default response time above which a backend is degraded
pub const DEFAULT_DEGRADED_THRESHOLD_MS: u64 = 1000;

/// Health status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Backend is healthy and responsive
    Healthy,
    /// Backend is responsive but slow (above degraded threshold)
    Degraded,
    /// Backend is not responsive or erroring
    Unhealthy,
}

impl HealthStatus {
    /// Convert to HTTP status code equivalent
    pub fn to_http_status_code(&self) -> u16 {
        match self {
            HealthStatus::Healthy => 200,
            HealthStatus::Degraded => 200,
            HealthStatus::Unhealthy => 503,
        }
    }

    /// Check if status is healthy or degraded (operational)
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }

    fn severity(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 2,
        }
    }

    /// The worse of two statuses
    pub fn worst(self, other: HealthStatus) -> HealthStatus {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

/// Health of a single backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub backend: String,
    pub status: HealthStatus,
    /// Response time in milliseconds
    pub response_time_ms: u64,
    pub timestamp: DateTime<Utc>,
    /// Error message (if unhealthy)
    pub error: Option<String>,
}

impl HealthCheckResult {
    /// Successful probe; degraded when slower than the threshold
    pub fn healthy(backend: impl Into<String>, response_time: Duration, degraded_threshold_ms: u64) -> Self {
        let response_time_ms = response_time.as_millis() as u64;
        let status = if response_time_ms > degraded_threshold_ms {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        Self {
            backend: backend.into(),
            status,
            response_time_ms,
            timestamp: Utc::now(),
            error: None,
        }
    }

    pub fn unhealthy(backend: impl Into<String>, response_time: Duration, error: &str) -> Self {
        Self {
            backend: backend.into(),
            status: HealthStatus::Unhealthy,
            response_time_ms: response_time.as_millis() as u64,
            timestamp: Utc::now(),
            error: Some(error.to_string()),
        }
    }
}

/// Health of every configured backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Worst status across backends; unhealthy when there are none
    pub overall: HealthStatus,
    pub backends: Vec<HealthCheckResult>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn from_results(backends: Vec<HealthCheckResult>) -> Self {
        let overall = if backends.is_empty() {
            HealthStatus::Unhealthy
        } else {
            backends
                .iter()
                .fold(HealthStatus::Healthy, |acc, r| acc.worst(r.status))
        };

        Self {
            overall,
            backends,
            checked_at: Utc::now(),
        }
    }

    pub fn backend(&self, name: &str) -> Option<&HealthCheckResult> {
        self.backends.iter().find(|r| r.backend == name)
    }
}

/// Probe one backend
pub async fn check_backend(
    backend: &dyn KnowledgeBackend,
    timeout: Duration,
    degraded_threshold_ms: u64,
) -> HealthCheckResult {
    let start = Instant::now();
    let name = backend.name();

    match tokio::time::timeout(timeout, backend.health_check()).await {
        Ok(Ok(())) => {
            let result = HealthCheckResult::healthy(name, start.elapsed(), degraded_threshold_ms);
            debug!(backend = name, "Health check passed in {}ms", result.response_time_ms);
            result
        }
        Ok(Err(e)) => {
            warn!(backend = name, "Health check failed: {}", e);
            HealthCheckResult::unhealthy(name, start.elapsed(), &e.to_string())
        }
        Err(_) => {
            let message = format!("Health check timed out after {:?}", timeout);
            warn!(backend = name, "{}", message);
            HealthCheckResult::unhealthy(name, start.elapsed(), &message)
        }
    }
}

/// Probe all backends concurrently; results keep the input order
pub async fn check_backends(
    backends: &[Arc<dyn KnowledgeBackend>],
    timeout: Duration,
    degraded_threshold_ms: u64,
) -> HealthReport {
    let probes = backends
        .iter()
        .map(|backend| check_backend(backend.as_ref(), timeout, degraded_threshold_ms));
    HealthReport::from_results(join_all(probes).await)
}

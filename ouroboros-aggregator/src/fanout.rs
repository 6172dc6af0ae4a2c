//! Concurrent backend fan-out
//!
//! Every backend call runs as its own tokio task under its own timeout. The
//! executor waits for all of them to settle and never short-circuits, so the
//! caller always gets one [`Outcome`] per backend.

use crate::backend::{KnowledgeBackend, KnowledgeRecord};
use crate::error::AggregatorError;
use crate::query::Query;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default per-backend time budget
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(10);

/// How one backend call ended
#[derive(Debug)]
pub enum Outcome {
    Success {
        results: Vec<KnowledgeRecord>,
        latency: Duration,
    },
    Failure {
        error: AggregatorError,
        latency: Duration,
    },
}

impl Outcome {
    pub fn latency(&self) -> Duration {
        match self {
            Outcome::Success { latency, .. } | Outcome::Failure { latency, .. } => *latency,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    /// Records returned; zero for a failure
    pub fn result_count(&self) -> usize {
        match self {
            Outcome::Success { results, .. } => results.len(),
            Outcome::Failure { .. } => 0,
        }
    }

    pub fn error(&self) -> Option<&AggregatorError> {
        match self {
            Outcome::Failure { error, .. } => Some(error),
            Outcome::Success { .. } => None,
        }
    }
}

/// Issues one query to many backends at once
#[derive(Debug, Clone)]
pub struct FanOutExecutor {
    timeout: Duration,
}

impl Default for FanOutExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_BACKEND_TIMEOUT)
    }
}

impl FanOutExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Query every backend concurrently and collect each outcome by backend name.
    ///
    /// Errors, timeouts and panics inside a backend become [`Outcome::Failure`]
    /// for that backend only. Nothing is retried.
    pub async fn fan_out(
        &self,
        query: &Query,
        backends: &[Arc<dyn KnowledgeBackend>],
    ) -> BTreeMap<String, Outcome> {
        let query = Arc::new(query.clone());
        let started = Instant::now();

        let mut names = Vec::with_capacity(backends.len());
        let mut handles = Vec::with_capacity(backends.len());
        for backend in backends {
            let backend = Arc::clone(backend);
            let query = Arc::clone(&query);
            let timeout = self.timeout;
            names.push(backend.name().to_string());

            handles.push(tokio::spawn(async move {
                let call_started = Instant::now();
                let name = backend.name().to_string();
                match tokio::time::timeout(timeout, backend.search(&query)).await {
                    Ok(Ok(results)) => Outcome::Success {
                        results,
                        latency: call_started.elapsed(),
                    },
                    Ok(Err(error)) => Outcome::Failure {
                        error: into_backend_failure(&name, error),
                        latency: call_started.elapsed(),
                    },
                    Err(_) => Outcome::Failure {
                        error: AggregatorError::Timeout {
                            backend: name,
                            timeout_ms: timeout.as_millis() as u64,
                        },
                        latency: call_started.elapsed(),
                    },
                }
            }));
        }

        let joined = join_all(handles).await;

        let mut outcomes = BTreeMap::new();
        for (name, joined) in names.into_iter().zip(joined) {
            let outcome = joined.unwrap_or_else(|e| Outcome::Failure {
                error: AggregatorError::backend(&name, format!("backend task aborted: {}", e)),
                latency: started.elapsed(),
            });

            match &outcome {
                Outcome::Success { results, latency } => {
                    debug!(backend = %name, results = results.len(), latency_ms = latency.as_millis() as u64, "Backend answered");
                }
                Outcome::Failure { error, latency } => {
                    warn!(backend = %name, latency_ms = latency.as_millis() as u64, "Backend failed: {}", error);
                }
            }
            outcomes.insert(name, outcome);
        }

        outcomes
    }
}

/// Keep timeouts and backend failures as they are; wrap anything else
fn into_backend_failure(backend: &str, error: AggregatorError) -> AggregatorError {
    match error {
        AggregatorError::BackendFailure { .. } | AggregatorError::Timeout { .. } => error,
        other => AggregatorError::backend(backend, other.to_string()),
    }
}

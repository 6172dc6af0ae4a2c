//! Integration tests for the bearer token identity cache

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use ouroboros_aggregator::{
    AggregatorConfig, AggregatorError, IdentityCache, IdentityContext, Principal, Result,
    TokenDescriptor, TokenValidator,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::Level;

/// Validator backed by a token table, counting every call per token
#[derive(Default)]
struct TableValidator {
    tokens: HashMap<String, IdentityContext>,
    calls: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
}

impl TableValidator {
    fn with_token(mut self, token: &str, user: &str, roles: &[&str]) -> Self {
        let principal = roles
            .iter()
            .fold(Principal::new(user).with_display_name(user.to_uppercase()), |p, role| {
                p.with_role(*role)
            });
        let descriptor = TokenDescriptor::bearer(token)
            .with_scope("knowledge:read")
            .with_expiry(Utc::now() + chrono::Duration::hours(1));
        self.tokens.insert(
            token.to_string(),
            IdentityContext::authenticated(principal, descriptor),
        );
        self
    }

    fn calls_for(&self, token: &str) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.get(token).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

#[async_trait]
impl TokenValidator for TableValidator {
    async fn validate(&self, token: &str) -> Result<IdentityContext> {
        self.total.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(token.to_string()).or_default() += 1;
        }

        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| AggregatorError::ValidationFailure("unknown token".to_string()))
    }
}

fn validator() -> Arc<TableValidator> {
    Arc::new(
        TableValidator::default()
            .with_token("tok1", "alice", &["admin", "reader"])
            .with_token("tok2", "bob", &["reader"]),
    )
}

#[tokio::test]
async fn test_tok1_validated_once_within_window() {
    let validator = validator();
    let cache = IdentityCache::from_config(&AggregatorConfig::default(), validator.clone()).unwrap();

    let first = cache.authenticate("tok1").await.unwrap();
    let second = cache.authenticate("tok1").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.principal_id(), Some("alice"));
    assert!(first.has_role("admin"));
    assert_eq!(validator.calls_for("tok1"), 1);
}

#[tokio::test]
async fn test_tokens_are_cached_independently() {
    let validator = validator();
    let cache = IdentityCache::new(validator.clone(), Duration::from_secs(300)).unwrap();

    cache.authenticate("tok1").await.unwrap();
    let bob = cache.authenticate("tok2").await.unwrap();
    cache.authenticate("tok1").await.unwrap();

    assert_eq!(bob.principal_id(), Some("bob"));
    assert!(!bob.has_role("admin"));
    assert_eq!(validator.calls_for("tok1"), 1);
    assert_eq!(validator.calls_for("tok2"), 1);
}

#[tokio::test]
async fn test_invalid_token_is_retried_every_time() {
    let validator = validator();
    let cache = IdentityCache::new(validator.clone(), Duration::from_secs(300)).unwrap();

    for _ in 0..3 {
        let err = cache.authenticate("forged").await.unwrap_err();
        assert!(matches!(err, AggregatorError::ValidationFailure(_)));
        assert!(err.is_fatal());
    }

    assert_eq!(validator.calls_for("forged"), 3);
    let stats = cache.stats().await;
    assert_eq!(stats.failures, 3);
    assert_eq!(stats.cache.tiers[0].entries, Some(0));
}

#[tokio::test]
async fn test_header_parsing() {
    let validator = validator();
    let cache = IdentityCache::new(validator.clone(), Duration::from_secs(300)).unwrap();

    let context = cache.authenticate_header("Bearer tok2").await.unwrap();
    assert!(context.is_authenticated());

    for header in ["tok2", "Basic dG9rMg==", "Bearer    "] {
        let err = cache.authenticate_header(header).await.unwrap_err();
        assert!(matches!(err, AggregatorError::ValidationFailure(_)));
    }
    // Malformed headers never reach the validator
    assert_eq!(validator.total.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_revoke_forces_revalidation() {
    let validator = validator();
    let cache = IdentityCache::new(validator.clone(), Duration::from_secs(300)).unwrap();

    cache.authenticate("tok1").await.unwrap();
    cache.revoke("tok1").await;
    cache.authenticate("tok1").await.unwrap();

    assert_eq!(validator.calls_for("tok1"), 2);
}

#[tokio::test]
async fn test_token_expiry_shortens_cache_window() {
    let mut table = TableValidator::default();
    let descriptor =
        TokenDescriptor::bearer("short").with_expiry(Utc::now() + chrono::Duration::milliseconds(150));
    table.tokens.insert(
        "short".to_string(),
        IdentityContext::authenticated(Principal::new("carol"), descriptor),
    );
    let validator = Arc::new(table);
    let cache = IdentityCache::new(validator.clone(), Duration::from_secs(300)).unwrap();

    cache.authenticate("short").await.unwrap();
    cache.authenticate("short").await.unwrap();
    assert_eq!(validator.calls_for("short"), 1);

    tokio::time::sleep(Duration::from_millis(250)).await;
    cache.authenticate("short").await.unwrap();
    assert_eq!(validator.calls_for("short"), 2);
}

#[tokio::test]
async fn test_concurrent_authentication_is_consistent() {
    let validator = validator();
    let cache = Arc::new(IdentityCache::new(validator.clone(), Duration::from_secs(300)).unwrap());

    // Warm the cache, then hammer it
    cache.authenticate("tok1").await.unwrap();
    let results = join_all((0..16).map(|_| {
        let cache = cache.clone();
        async move { cache.authenticate("tok1").await }
    }))
    .await;

    assert!(results.iter().all(|r| r.as_ref().map(|c| c.principal_id() == Some("alice")).unwrap_or(false)));
    assert_eq!(validator.calls_for("tok1"), 1);
}

/// Collects formatted log output for assertions
#[derive(Clone, Default)]
struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Ok(mut out) = self.0.lock() {
            out.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl LogCapture {
    fn contents(&self) -> String {
        self.0
            .lock()
            .map(|out| String::from_utf8_lossy(&out).into_owned())
            .unwrap_or_default()
    }
}

#[tokio::test]
async fn test_tokens_never_reach_debug_logs() {
    let capture = LogCapture::default();
    let writer = capture.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let secret = "SECRET-BEARER-abc123";
    let validator = Arc::new(TableValidator::default().with_token(secret, "dave", &["reader"]));
    let cache = IdentityCache::new(validator.clone(), Duration::from_secs(300)).unwrap();

    cache.authenticate(secret).await.unwrap();
    cache.authenticate(secret).await.unwrap();
    cache.revoke(secret).await;

    let logs = capture.contents();
    assert!(logs.contains("Cache miss"));
    assert!(logs.contains("Identity served from cache"));
    assert!(!logs.contains(secret));
    assert_eq!(validator.calls_for(secret), 1);
}

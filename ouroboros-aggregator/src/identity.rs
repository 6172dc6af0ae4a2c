//! Identity cache for bearer tokens
//!
//! Validated identities are kept in a single in-process tier keyed by a
//! SHA-256 digest of the token, so raw tokens never appear as cache keys or
//! in cache logs. A miss calls the external [`TokenValidator`] once; failed
//! validations are never cached.

use crate::cache::{spawn_auto_cleanup, CacheStats, MemoryTierConfig, TieredCache};
use crate::config::AggregatorConfig;
use crate::error::{AggregatorError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default window a validated identity stays cached
pub const DEFAULT_IDENTITY_TTL: Duration = Duration::from_secs(300);

/// The authenticated party
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: BTreeSet<String>,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            email: None,
            roles: BTreeSet::new(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }
}

/// The credential an identity was established with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenDescriptor {
    /// e.g. "Bearer"
    pub scheme: String,
    pub value: String,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenDescriptor {
    pub fn bearer(value: impl Into<String>) -> Self {
        Self {
            scheme: "Bearer".to_string(),
            value: value.into(),
            scope: None,
            expires_at: None,
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Time left before the token expires; `None` when it never does.
    /// An expired token has `Some(Duration::ZERO)`.
    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| (at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
    }
}

/// Result of validating a token. Never mutated once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityContext {
    pub authenticated: bool,
    #[serde(default)]
    pub principal: Option<Principal>,
    #[serde(default)]
    pub token: Option<TokenDescriptor>,
}

impl IdentityContext {
    pub fn authenticated(principal: Principal, token: TokenDescriptor) -> Self {
        Self {
            authenticated: true,
            principal: Some(principal),
            token: Some(token),
        }
    }

    pub fn anonymous() -> Self {
        Self {
            authenticated: false,
            principal: None,
            token: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.principal
            .as_ref()
            .map_or(false, |p| p.roles.contains(role))
    }

    pub fn principal_id(&self) -> Option<&str> {
        self.principal.as_ref().map(|p| p.id.as_str())
    }
}

/// External token verification (signature check, introspection, ...)
#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate(&self, token: &str) -> Result<IdentityContext>;
}

/// Extract token from Authorization header (Bearer token)
pub fn extract_bearer_token(auth_header: &str) -> Result<&str> {
    let Some(token) = auth_header.strip_prefix("Bearer ") else {
        return Err(AggregatorError::ValidationFailure(
            "Invalid authorization header format".to_string(),
        ));
    };

    let token = token.trim();
    if token.is_empty() {
        return Err(AggregatorError::ValidationFailure("Empty token".to_string()));
    }

    Ok(token)
}

/// Cache key for a token
fn token_key(token: &str) -> String {
    format!("identity:{}", hex::encode(Sha256::digest(token.as_bytes())))
}

/// Identity cache counters
#[derive(Debug, Clone)]
pub struct IdentityCacheStats {
    /// Calls made to the validator
    pub validations: u64,
    /// Validator calls that failed
    pub failures: u64,
    pub cache: CacheStats,
}

/// Caches validator answers per token
pub struct IdentityCache {
    validator: Arc<dyn TokenValidator>,
    cache: Arc<TieredCache>,
    ttl: Duration,
    validations: AtomicU64,
    failures: AtomicU64,
}

impl IdentityCache {
    /// Cache with the small memory tier preset
    pub fn new(validator: Arc<dyn TokenValidator>, ttl: Duration) -> Result<Self> {
        Self::with_tier(validator, ttl, MemoryTierConfig::small())
    }

    pub fn with_tier(
        validator: Arc<dyn TokenValidator>,
        ttl: Duration,
        tier: MemoryTierConfig,
    ) -> Result<Self> {
        if ttl.is_zero() {
            return Err(AggregatorError::ConfigurationError(
                "identity cache ttl must be greater than 0".to_string(),
            ));
        }

        let cache = Arc::new(TieredCache::new(tier)?);
        spawn_auto_cleanup(&cache);

        Ok(Self {
            validator,
            cache,
            ttl,
            validations: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        })
    }

    pub fn from_config(config: &AggregatorConfig, validator: Arc<dyn TokenValidator>) -> Result<Self> {
        Self::new(validator, config.identity_ttl)
    }

    /// Cached identity for `token`, validating on a miss.
    /// Validation errors surface as [`AggregatorError::ValidationFailure`].
    pub async fn authenticate(&self, token: &str) -> Result<IdentityContext> {
        if token.trim().is_empty() {
            return Err(AggregatorError::ValidationFailure("Empty token".to_string()));
        }

        let key = token_key(token);
        if let Some(context) = self.cache.get_json::<IdentityContext>(&key).await {
            debug!(principal = ?context.principal_id(), "Identity served from cache");
            return Ok(context);
        }

        self.validations.fetch_add(1, Ordering::Relaxed);
        let context = match self.validator.validate(token).await {
            Ok(context) => context,
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!("Token validation failed: {}", e);
                return Err(match e {
                    rejected @ AggregatorError::ValidationFailure(_) => rejected,
                    other => AggregatorError::ValidationFailure(other.to_string()),
                });
            }
        };

        let ttl = self.cache_ttl(&context);
        if ttl.is_zero() {
            debug!(principal = ?context.principal_id(), "Token already expired, not caching identity");
            return Ok(context);
        }

        if let Err(e) = self.cache.set_json(&key, &context, ttl).await {
            warn!("Failed to cache identity: {}", e);
        }
        Ok(context)
    }

    /// Authenticate an `Authorization: Bearer <token>` header value
    pub async fn authenticate_header(&self, auth_header: &str) -> Result<IdentityContext> {
        let token = extract_bearer_token(auth_header)?;
        self.authenticate(token).await
    }

    /// Forget a token; the next use is validated again
    pub async fn revoke(&self, token: &str) {
        self.cache.invalidate(&token_key(token)).await;
    }

    pub async fn stats(&self) -> IdentityCacheStats {
        IdentityCacheStats {
            validations: self.validations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            cache: self.cache.stats().await,
        }
    }

    /// The configured window, shortened to the token's own remaining life
    fn cache_ttl(&self, context: &IdentityContext) -> Duration {
        match context.token.as_ref().and_then(TokenDescriptor::remaining) {
            Some(remaining) => remaining.min(self.ttl),
            None => self.ttl,
        }
    }
}

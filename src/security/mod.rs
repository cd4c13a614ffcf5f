//! # Security Module
//!
//! Token validation collaborators used by [`AuthMiddleware`](crate::middleware::AuthMiddleware).
//!
//! ## Overview
//!
//! The auth middleware does not know how a credential is checked. It extracts the
//! token and calls a [`TokenValidator`], which answers with the authenticated
//! [`Principal`] or an [`AuthError`]. Three validators ship with the crate:
//!
//! - **[`JwtValidator`]** - HS256/HS384/HS512 JWTs checked with `jsonwebtoken`
//!   (signature, expiry, optional issuer/audience), with an optional LRU claims cache
//! - **[`StaticTokenValidator`]** - fixed tokens mapped to principals, compared as
//!   SHA-256 digests in constant time
//! - **[`RemoteTokenValidator`]** - delegates to an HTTP verification endpoint with a
//!   hard timeout and a TTL cache of definitive answers
//!
//! Any `Fn(&str) -> Result<Principal, AuthError>` is also a validator, which keeps
//! tests and ad hoc integrations short.
//!
//! ## Timeouts
//!
//! A validator that performs I/O must bound it. [`RemoteTokenValidator`] turns an
//! elapsed deadline into [`AuthError::Timeout`], which the middleware answers with
//! `401`, so a slow verifier never stalls the chain.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use sentryroute::middleware::AuthMiddleware;
//! use sentryroute::security::JwtValidator;
//!
//! let validator = JwtValidator::hs256("change-me").issuer("sentry").with_cache(1024);
//! let auth = AuthMiddleware::new(Arc::new(validator))
//!     .exclude_paths(&["/api/health", "/public/*"])
//!     .expect("valid exclusion patterns");
//! ```

use std::sync::Arc;

use crate::context::Principal;
use crate::error::AuthError;

/// Pluggable credential check.
pub trait TokenValidator: Send + Sync {
    /// Validate `token` (already stripped of its `Bearer ` prefix).
    ///
    /// # Errors
    ///
    /// An [`AuthError`] describing why the token was not accepted.
    fn validate(&self, token: &str) -> Result<Principal, AuthError>;
}

impl<F> TokenValidator for F
where
    F: Fn(&str) -> Result<Principal, AuthError> + Send + Sync,
{
    fn validate(&self, token: &str) -> Result<Principal, AuthError> {
        self(token)
    }
}

/// Tries several validators in order and accepts the first success.
///
/// Used when more than one credential source is configured (static service
/// tokens next to user JWTs, for example). If every validator refuses, the
/// error of the last one is returned. An empty list refuses everything with
/// [`AuthError::Unavailable`].
#[derive(Clone, Default)]
pub struct FallbackValidator {
    validators: Vec<Arc<dyn TokenValidator>>,
}

impl FallbackValidator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, validator: Arc<dyn TokenValidator>) -> Self {
        self.validators.push(validator);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}

impl std::fmt::Debug for FallbackValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackValidator")
            .field("validators", &self.validators.len())
            .finish()
    }
}

impl TokenValidator for FallbackValidator {
    fn validate(&self, token: &str) -> Result<Principal, AuthError> {
        let mut last = AuthError::Unavailable("no token validator configured".to_string());
        for validator in &self.validators {
            match validator.validate(token) {
                Ok(principal) => return Ok(principal),
                Err(e) => last = e,
            }
        }
        Err(last)
    }
}

/// Cache statistics for validators that memoize results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits (successful lookups)
    pub hits: u64,
    /// Number of cache misses (lookups that required a full validation)
    pub misses: u64,
    /// Current number of entries in cache
    pub size: usize,
    /// Maximum capacity of cache
    pub capacity: usize,
}

impl CacheStats {
    /// Calculate cache hit rate as a percentage
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Scopes from a `scope` claim (space separated) or a `scopes` array.
pub(crate) fn scopes_from_claims(claims: &serde_json::Value) -> Vec<String> {
    if let Some(s) = claims.get("scope").and_then(|v| v.as_str()) {
        return s.split_whitespace().map(str::to_string).collect();
    }
    claims
        .get("scopes")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

pub use jwt::JwtValidator;
pub use remote::RemoteTokenValidator;
pub use static_token::StaticTokenValidator;

mod jwt;
mod remote;
mod static_token;

#[cfg(test)]
mod tests {
    use super::*;

    fn only(expected: &'static str, subject: &'static str) -> Arc<dyn TokenValidator> {
        Arc::new(move |token: &str| {
            if token == expected {
                Ok(Principal::new(subject))
            } else {
                Err(AuthError::InvalidToken("unknown token".to_string()))
            }
        })
    }

    #[test]
    fn fallback_accepts_first_success() {
        let v = FallbackValidator::new()
            .with(only("svc", "service"))
            .with(only("usr", "analyst"));
        assert_eq!(v.len(), 2);
        assert_eq!(v.validate("svc").map(|p| p.subject), Ok("service".to_string()));
        assert_eq!(v.validate("usr").map(|p| p.subject), Ok("analyst".to_string()));
        assert!(matches!(v.validate("nope"), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn empty_fallback_refuses() {
        let v = FallbackValidator::new();
        assert!(v.is_empty());
        assert!(matches!(v.validate("x"), Err(AuthError::Unavailable(_))));
    }

    #[test]
    fn scopes_from_either_claim_shape() {
        let a = serde_json::json!({ "scope": "read write" });
        let b = serde_json::json!({ "scopes": ["admin", 3] });
        assert_eq!(scopes_from_claims(&a), vec!["read", "write"]);
        assert_eq!(scopes_from_claims(&b), vec!["admin"]);
        assert!(scopes_from_claims(&serde_json::json!({})).is_empty());
    }

    #[test]
    fn hit_rate_is_a_percentage() {
        let stats = CacheStats { hits: 3, misses: 1, size: 1, capacity: 8 };
        assert!((stats.hit_rate() - 75.0).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}

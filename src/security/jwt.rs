use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use super::{scopes_from_claims, CacheStats, TokenValidator};
use crate::context::Principal;
use crate::error::AuthError;

/// HMAC-signed JWT validator.
///
/// Checks the signature and `exp` (always required), and `iss`/`aud` when
/// configured. The `sub` claim becomes [`Principal::subject`]; scopes come from
/// `scope` or `scopes`.
pub struct JwtValidator {
    key: DecodingKey,
    algorithm: Algorithm,
    issuer: Option<String>,
    audience: Option<String>,
    leeway_secs: u64,
    claims_cache: Option<Mutex<LruCache<String, (Principal, u64)>>>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl JwtValidator {
    /// HS256 validator for the shared `secret`.
    pub fn hs256(secret: impl AsRef<[u8]>) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_ref()),
            algorithm: Algorithm::HS256,
            issuer: None,
            audience: None,
            leeway_secs: 30,
            claims_cache: None,
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    /// Use HS384 or HS512 instead of HS256. Other algorithms are ignored.
    #[must_use]
    pub fn algorithm(mut self, algorithm: Algorithm) -> Self {
        if matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            self.algorithm = algorithm;
        }
        self
    }

    #[must_use]
    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    #[must_use]
    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Clock skew tolerated on `exp`/`nbf` (default 30 s).
    #[must_use]
    pub fn leeway(mut self, secs: u64) -> Self {
        self.leeway_secs = secs;
        self
    }

    /// Memoize decoded principals for up to `capacity` tokens until they expire.
    /// A capacity of zero disables the cache.
    #[must_use]
    pub fn with_cache(mut self, capacity: usize) -> Self {
        self.claims_cache = NonZeroUsize::new(capacity).map(|c| Mutex::new(LruCache::new(c)));
        self
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        let (size, capacity) = self
            .claims_cache
            .as_ref()
            .map(|c| {
                let c = c.lock();
                (c.len(), c.cap().get())
            })
            .unwrap_or((0, 0));
        CacheStats {
            hits: self.cache_hits.load(Ordering::Relaxed),
            misses: self.cache_misses.load(Ordering::Relaxed),
            size,
            capacity,
        }
    }

    fn cached(&self, token: &str, now: u64) -> Option<Principal> {
        let cache = self.claims_cache.as_ref()?;
        let mut cache = cache.lock();
        match cache.get(token) {
            Some((principal, exp)) if now <= exp.saturating_add(self.leeway_secs) => {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                Some(principal.clone())
            }
            Some(_) => {
                debug!("JWT cache: token expired, removing from cache");
                cache.pop(token);
                None
            }
            None => None,
        }
    }

    fn decode(&self, token: &str) -> Result<Value, AuthError> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = self.leeway_secs;
        validation.set_required_spec_claims(&["exp"]);
        validation.validate_aud = self.audience.is_some();
        if let Some(iss) = &self.issuer {
            validation.set_issuer(&[iss]);
        }
        if let Some(aud) = &self.audience {
            validation.set_audience(&[aud]);
        }

        jsonwebtoken::decode::<Value>(token, &self.key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                ErrorKind::InvalidSignature => AuthError::InvalidToken("invalid signature".into()),
                ErrorKind::InvalidIssuer => AuthError::InvalidToken("invalid issuer".into()),
                ErrorKind::InvalidAudience => AuthError::InvalidToken("invalid audience".into()),
                ErrorKind::ImmatureSignature => AuthError::InvalidToken("token not yet valid".into()),
                ErrorKind::MissingRequiredClaim(claim) => {
                    AuthError::InvalidToken(format!("missing claim `{claim}`"))
                }
                ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
                    AuthError::MalformedCredentials
                }
                other => AuthError::InvalidToken(format!("{other:?}")),
            })
    }
}

impl TokenValidator for JwtValidator {
    fn validate(&self, token: &str) -> Result<Principal, AuthError> {
        let now = jsonwebtoken::get_current_timestamp();
        if let Some(principal) = self.cached(token, now) {
            return Ok(principal);
        }
        if self.claims_cache.is_some() {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }

        let claims = self.decode(token)?;
        let subject = claims
            .get("sub")
            .and_then(Value::as_str)
            .ok_or_else(|| AuthError::InvalidToken("missing claim `sub`".into()))?
            .to_string();
        let exp = claims.get("exp").and_then(Value::as_u64).unwrap_or(now);
        let principal = Principal::new(subject)
            .with_scopes(scopes_from_claims(&claims))
            .with_claims(claims);

        if let Some(cache) = &self.claims_cache {
            cache.lock().put(token.to_string(), (principal.clone(), exp));
        }
        debug!(subject = %principal.subject, "JWT validated");
        Ok(principal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "unit-test-secret";

    fn token(claims: Value) -> String {
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn in_an_hour() -> u64 {
        jsonwebtoken::get_current_timestamp() + 3600
    }

    #[test]
    fn accepts_valid_token() {
        let v = JwtValidator::hs256(SECRET);
        let p = v
            .validate(&token(json!({ "sub": "analyst-7", "exp": in_an_hour(), "scope": "read write" })))
            .unwrap();
        assert_eq!(p.subject, "analyst-7");
        assert!(p.has_scope("write"));
        assert_eq!(p.claims["sub"], "analyst-7");
    }

    #[test]
    fn rejects_wrong_signature() {
        let v = JwtValidator::hs256("another-secret");
        let err = v
            .validate(&token(json!({ "sub": "a", "exp": in_an_hour() })))
            .unwrap_err();
        assert_eq!(err, AuthError::InvalidToken("invalid signature".into()));
    }

    #[test]
    fn rejects_expired_token() {
        let v = JwtValidator::hs256(SECRET).leeway(0);
        let err = v.validate(&token(json!({ "sub": "a", "exp": 1_000 }))).unwrap_err();
        assert_eq!(err, AuthError::Expired);
    }

    #[test]
    fn rejects_garbage() {
        let v = JwtValidator::hs256(SECRET);
        assert_eq!(v.validate("not-a-jwt").unwrap_err(), AuthError::MalformedCredentials);
    }

    #[test]
    fn enforces_issuer() {
        let v = JwtValidator::hs256(SECRET).issuer("sentry");
        let ok = token(json!({ "sub": "a", "exp": in_an_hour(), "iss": "sentry" }));
        let bad = token(json!({ "sub": "a", "exp": in_an_hour(), "iss": "other" }));
        assert!(v.validate(&ok).is_ok());
        assert!(matches!(v.validate(&bad), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn requires_subject() {
        let v = JwtValidator::hs256(SECRET);
        let err = v.validate(&token(json!({ "exp": in_an_hour() }))).unwrap_err();
        assert_eq!(err, AuthError::InvalidToken("missing claim `sub`".into()));
    }

    #[test]
    fn cache_counts_hits() {
        let v = JwtValidator::hs256(SECRET).with_cache(8);
        let t = token(json!({ "sub": "a", "exp": in_an_hour() }));
        v.validate(&t).unwrap();
        v.validate(&t).unwrap();
        let stats = v.cache_stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.size, 1);
        assert_eq!(stats.capacity, 8);
    }
}

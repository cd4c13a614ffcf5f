use std::num::NonZeroUsize;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use super::{scopes_from_claims, TokenValidator};
use crate::context::Principal;
use crate::error::AuthError;

/// Token validator backed by a remote verification endpoint.
///
/// Each cache miss sends `GET <verify_url>` with `Authorization: Bearer <token>`.
///
/// - `2xx`: accepted. A JSON body may carry `sub` and `scope`/`scopes`; without
///   one the principal's subject is `"remote"`.
/// - `401`/`403`: rejected with [`AuthError::InvalidToken`].
/// - Other statuses or transport failures: [`AuthError::Unavailable`].
/// - No answer within the timeout: [`AuthError::Timeout`].
///
/// Acceptances and rejections are cached for `cache_ttl` in an LRU holding at
/// most `cache_size` tokens. Timeouts and outages are not cached, so the next
/// request retries the verifier.
///
/// ```rust
/// use std::time::Duration;
/// use sentryroute::security::RemoteTokenValidator;
///
/// let validator = RemoteTokenValidator::new("https://auth.internal/verify")
///     .timeout(Duration::from_millis(250))
///     .cache_ttl(Duration::from_secs(30))
///     .cache_size(4096);
/// ```
pub struct RemoteTokenValidator {
    verify_url: String,
    timeout: Duration,
    cache_ttl: Duration,
    client: OnceLock<reqwest::blocking::Client>,
    cache: Option<Mutex<LruCache<String, (Instant, Result<Principal, AuthError>)>>>,
}

impl RemoteTokenValidator {
    const DEFAULT_CACHE_SIZE: usize = 1024;

    pub fn new(verify_url: impl Into<String>) -> Self {
        Self {
            verify_url: verify_url.into(),
            timeout: Duration::from_millis(500),
            cache_ttl: Duration::from_secs(60),
            client: OnceLock::new(),
            cache: None,
        }
        .cache_size(Self::DEFAULT_CACHE_SIZE)
    }

    /// Upper bound on one verification round trip. Default: 500ms
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// How long a definitive answer is reused. Default: 60 seconds
    #[must_use]
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Most tokens remembered at once; the least recently used answer is
    /// dropped first. Zero disables caching. Default: 1024
    #[must_use]
    pub fn cache_size(mut self, capacity: usize) -> Self {
        self.cache = NonZeroUsize::new(capacity).map(|c| Mutex::new(LruCache::new(c)));
        self
    }

    /// Tokens currently cached.
    #[must_use]
    pub fn cached_tokens(&self) -> usize {
        self.cache.as_ref().map_or(0, |c| c.lock().len())
    }

    #[must_use]
    pub fn verify_url(&self) -> &str {
        &self.verify_url
    }

    fn client(&self) -> Result<&reqwest::blocking::Client, AuthError> {
        if let Some(c) = self.client.get() {
            return Ok(c);
        }
        let built = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.timeout)
            .build()
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;
        Ok(self.client.get_or_init(|| built))
    }

    fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        let response = self
            .client()?
            .get(&self.verify_url)
            .bearer_auth(token)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    AuthError::Timeout
                } else {
                    AuthError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            let body: Value = response.json().unwrap_or(Value::Null);
            let subject = body
                .get("sub")
                .and_then(Value::as_str)
                .unwrap_or("remote")
                .to_string();
            Ok(Principal::new(subject)
                .with_scopes(scopes_from_claims(&body))
                .with_claims(body))
        } else if status.as_u16() == 401 || status.as_u16() == 403 {
            Err(AuthError::InvalidToken("rejected by verifier".into()))
        } else {
            Err(AuthError::Unavailable(format!("verifier answered {status}")))
        }
    }
}

impl TokenValidator for RemoteTokenValidator {
    fn validate(&self, token: &str) -> Result<Principal, AuthError> {
        if let Some(cache) = &self.cache {
            let mut cache = cache.lock();
            let cached = cache
                .get(token)
                .map(|(at, result)| (at.elapsed() < self.cache_ttl).then(|| result.clone()));
            match cached {
                Some(Some(result)) => return result,
                Some(None) => {
                    cache.pop(token);
                }
                None => {}
            }
        }

        let result = self.verify(token);
        match &result {
            Ok(_) | Err(AuthError::InvalidToken(_)) => {
                if let Some(cache) = &self.cache {
                    cache
                        .lock()
                        .put(token.to_string(), (Instant::now(), result.clone()));
                }
            }
            Err(e) => {
                warn!(url = %self.verify_url, error = %e, "Remote token verification failed");
            }
        }
        debug!(url = %self.verify_url, accepted = result.is_ok(), "Remote token verified");
        result
    }
}

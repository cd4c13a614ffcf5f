//! Token-bucket rate limiting.
//!
//! [`RateLimitMiddleware`] derives a key for each request and asks a
//! [`RateLimitStore`] whether that key may proceed. The in-memory
//! [`TokenBucketStore`] is the default store; a shared store (e.g. backed by a
//! cache cluster) can be plugged in through the trait.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::{Middleware, Next};
use crate::context::RequestContext;
use crate::error::Rejection;
use crate::handler::HandlerResult;

/// Bucket size and refill speed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quota {
    capacity: u32,
    refill_per_sec: f64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QuotaError {
    #[error("rate limit capacity must be at least 1")]
    ZeroCapacity,
    #[error("rate limit refill rate must be a positive number, got {0}")]
    InvalidRefill(f64),
}

impl Quota {
    /// Burst of `capacity` requests, refilled at `refill_per_sec` tokens per second.
    ///
    /// # Errors
    ///
    /// [`QuotaError`] for a zero capacity or a non-positive / non-finite rate.
    pub fn new(capacity: u32, refill_per_sec: f64) -> Result<Self, QuotaError> {
        if capacity == 0 {
            return Err(QuotaError::ZeroCapacity);
        }
        if !refill_per_sec.is_finite() || refill_per_sec <= 0.0 {
            return Err(QuotaError::InvalidRefill(refill_per_sec));
        }
        Ok(Self {
            capacity,
            refill_per_sec,
        })
    }

    /// `n` requests per second with a burst of `n`.
    ///
    /// # Errors
    ///
    /// [`QuotaError::ZeroCapacity`] when `n` is zero.
    pub fn per_second(n: u32) -> Result<Self, QuotaError> {
        Self::new(n, f64::from(n))
    }

    /// `n` requests per minute with a burst of `n`.
    ///
    /// # Errors
    ///
    /// [`QuotaError::ZeroCapacity`] when `n` is zero.
    pub fn per_minute(n: u32) -> Result<Self, QuotaError> {
        Self::new(n, f64::from(n) / 60.0)
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[must_use]
    pub fn refill_per_sec(&self) -> f64 {
        self.refill_per_sec
    }
}

/// Answer of a [`RateLimitStore`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

/// Counter backend. Must be safe to call from many dispatch threads at once.
pub trait RateLimitStore: Send + Sync {
    /// Take one token for `key` at time `now`.
    fn acquire(&self, key: &str, quota: &Quota, now: Instant) -> RateDecision;
}

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    last_access: Instant,
}

impl TokenBucket {
    fn full(quota: &Quota, now: Instant) -> Self {
        Self {
            tokens: f64::from(quota.capacity),
            last_refill: now,
            last_access: now,
        }
    }

    fn take(&mut self, quota: &Quota, now: Instant) -> RateDecision {
        self.last_access = now;
        let cap = f64::from(quota.capacity);
        let elapsed = now.saturating_duration_since(self.last_refill);
        let tokens_to_add = (elapsed.as_secs_f64() * quota.refill_per_sec).min(cap);
        if tokens_to_add > 0.0 {
            self.tokens = (self.tokens + tokens_to_add).min(cap);
            self.last_refill = now;
        }

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            RateDecision::Allowed {
                remaining: self.tokens.floor() as u32,
            }
        } else {
            let wait = (1.0 - self.tokens) / quota.refill_per_sec;
            // very slow rates overflow Duration
            RateDecision::Limited {
                retry_after: Duration::try_from_secs_f64(wait).unwrap_or(Duration::MAX),
            }
        }
    }
}

/// In-process token buckets keyed by client.
///
/// The number of tracked keys is capped so spoofed client addresses cannot
/// grow memory without bound. At the cap, idle buckets are evicted first; if
/// none are idle the new key is limited.
pub struct TokenBucketStore {
    buckets: DashMap<String, TokenBucket>,
    max_keys: usize,
    idle_ttl: Duration,
}

impl TokenBucketStore {
    const DEFAULT_MAX_KEYS: usize = 100_000;

    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
            max_keys: Self::DEFAULT_MAX_KEYS,
            idle_ttl: Duration::from_secs(300),
        }
    }

    #[must_use]
    pub fn max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = max_keys.max(1);
        self
    }

    /// Buckets untouched for this long may be evicted. Default: 5 minutes
    #[must_use]
    pub fn idle_ttl(mut self, ttl: Duration) -> Self {
        self.idle_ttl = ttl;
        self
    }

    /// Drop buckets idle since before `now - idle_ttl`. Returns how many were removed.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, b| now.saturating_duration_since(b.last_access) < self.idle_ttl);
        before.saturating_sub(self.buckets.len())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

impl Default for TokenBucketStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TokenBucketStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBucketStore")
            .field("keys", &self.buckets.len())
            .field("max_keys", &self.max_keys)
            .field("idle_ttl", &self.idle_ttl)
            .finish()
    }
}

impl RateLimitStore for TokenBucketStore {
    fn acquire(&self, key: &str, quota: &Quota, now: Instant) -> RateDecision {
        if let Some(mut bucket) = self.buckets.get_mut(key) {
            return bucket.take(quota, now);
        }

        if self.buckets.len() >= self.max_keys {
            let evicted = self.evict_idle(now);
            debug!(evicted, "Rate limit store at capacity, evicted idle buckets");
            if self.buckets.len() >= self.max_keys {
                return RateDecision::Limited {
                    retry_after: Duration::from_secs(1),
                };
            }
        }

        self.buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::full(quota, now))
            .take(quota, now)
    }
}

/// How requests are grouped into buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// First `X-Forwarded-For` hop, else the peer address
    ClientAddress,
    /// Authenticated subject when present, else the client address
    #[default]
    IdentityOrClient,
    /// One bucket shared by every request
    Global,
}

impl KeyStrategy {
    fn key(self, ctx: &RequestContext) -> String {
        let client = || {
            ctx.header("x-forwarded-for")
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .or(ctx.remote_addr.as_deref())
                .map(|a| format!("ip:{a}"))
                .unwrap_or_else(|| "anonymous".to_string())
        };
        match self {
            KeyStrategy::ClientAddress => client(),
            KeyStrategy::IdentityOrClient => ctx
                .identity()
                .map(|p| format!("sub:{}", p.subject))
                .unwrap_or_else(client),
            KeyStrategy::Global => "global".to_string(),
        }
    }
}

/// Answers `429` once a client's bucket is empty.
///
/// Allowed responses carry `X-RateLimit-Limit` and `X-RateLimit-Remaining`;
/// limited ones add `Retry-After`.
pub struct RateLimitMiddleware {
    store: Arc<dyn RateLimitStore>,
    quota: Quota,
    strategy: KeyStrategy,
}

impl RateLimitMiddleware {
    /// In-memory token buckets with the given quota.
    #[must_use]
    pub fn new(quota: Quota) -> Self {
        Self::with_store(quota, Arc::new(TokenBucketStore::new()))
    }

    #[must_use]
    pub fn with_store(quota: Quota, store: Arc<dyn RateLimitStore>) -> Self {
        Self {
            store,
            quota,
            strategy: KeyStrategy::default(),
        }
    }

    #[must_use]
    pub fn key_strategy(mut self, strategy: KeyStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    #[must_use]
    pub fn quota(&self) -> Quota {
        self.quota
    }
}

impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> HandlerResult {
        let key = self.strategy.key(ctx);
        match self.store.acquire(&key, &self.quota, Instant::now()) {
            RateDecision::Allowed { remaining } => {
                let mut res = next.run(ctx)?;
                res.set_header("x-ratelimit-limit", self.quota.capacity.to_string());
                res.set_header("x-ratelimit-remaining", remaining.to_string());
                Ok(res)
            }
            RateDecision::Limited { retry_after } => {
                warn!(
                    key = %key,
                    path = %ctx.path,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Rate limit exceeded"
                );
                Ok(Rejection::RateLimitExceeded {
                    limit: self.quota.capacity,
                    retry_after,
                }
                .into_response())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{HandlerResponse, Principal};
    use crate::middleware::MiddlewareChain;
    use http::Method;

    fn quota(cap: u32, refill: f64) -> Quota {
        Quota::new(cap, refill).unwrap()
    }

    #[test]
    fn bucket_drains_then_refills() {
        let store = TokenBucketStore::new();
        let q = quota(2, 1.0);
        let t0 = Instant::now();
        assert_eq!(store.acquire("c", &q, t0), RateDecision::Allowed { remaining: 1 });
        assert_eq!(store.acquire("c", &q, t0), RateDecision::Allowed { remaining: 0 });
        match store.acquire("c", &q, t0) {
            RateDecision::Limited { retry_after } => {
                assert!(retry_after <= Duration::from_secs(1));
                assert!(retry_after > Duration::from_millis(900));
            }
            other => panic!("expected limit, got {other:?}"),
        }
        assert!(matches!(
            store.acquire("c", &q, t0 + Duration::from_millis(1100)),
            RateDecision::Allowed { .. }
        ));
    }

    #[test]
    fn keys_are_independent() {
        let store = TokenBucketStore::new();
        let q = quota(1, 1.0);
        let t0 = Instant::now();
        assert!(matches!(store.acquire("a", &q, t0), RateDecision::Allowed { .. }));
        assert!(matches!(store.acquire("a", &q, t0), RateDecision::Limited { .. }));
        assert!(matches!(store.acquire("b", &q, t0), RateDecision::Allowed { .. }));
    }

    #[test]
    fn refill_never_exceeds_capacity() {
        let store = TokenBucketStore::new();
        let q = quota(3, 100.0);
        let t0 = Instant::now();
        store.acquire("c", &q, t0);
        let later = t0 + Duration::from_secs(60);
        assert_eq!(store.acquire("c", &q, later), RateDecision::Allowed { remaining: 2 });
    }

    #[test]
    fn key_cap_evicts_idle_then_limits() {
        let store = TokenBucketStore::new()
            .max_keys(2)
            .idle_ttl(Duration::from_secs(10));
        let q = quota(5, 1.0);
        let t0 = Instant::now();
        store.acquire("a", &q, t0);
        store.acquire("b", &q, t0);
        assert!(matches!(store.acquire("c", &q, t0), RateDecision::Limited { .. }));
        assert_eq!(store.len(), 2);

        let later = t0 + Duration::from_secs(11);
        assert!(matches!(store.acquire("c", &q, later), RateDecision::Allowed { .. }));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn invalid_quotas() {
        assert_eq!(Quota::new(0, 1.0), Err(QuotaError::ZeroCapacity));
        assert!(matches!(Quota::new(1, 0.0), Err(QuotaError::InvalidRefill(_))));
        assert!(matches!(Quota::new(1, f64::NAN), Err(QuotaError::InvalidRefill(_))));
        assert!((Quota::per_minute(60).unwrap().refill_per_sec() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn key_strategies() {
        let mut ctx = RequestContext::new(Method::GET, "/");
        assert_eq!(KeyStrategy::ClientAddress.key(&ctx), "anonymous");
        ctx.remote_addr = Some("10.0.0.9".into());
        assert_eq!(KeyStrategy::ClientAddress.key(&ctx), "ip:10.0.0.9");
        ctx.headers
            .push((Arc::from("X-Forwarded-For"), "203.0.113.5, 10.0.0.1".into()));
        assert_eq!(KeyStrategy::ClientAddress.key(&ctx), "ip:203.0.113.5");
        assert_eq!(KeyStrategy::IdentityOrClient.key(&ctx), "ip:203.0.113.5");
        ctx.set_identity(Principal::new("analyst"));
        assert_eq!(KeyStrategy::IdentityOrClient.key(&ctx), "sub:analyst");
        assert_eq!(KeyStrategy::Global.key(&ctx), "global");
    }

    #[test]
    fn middleware_limits_and_sets_headers() {
        let mw = RateLimitMiddleware::new(quota(2, 0.001));
        let chain = MiddlewareChain::new().with(Arc::new(mw));
        let handler = |_: &RequestContext| -> HandlerResult { Ok(HandlerResponse::no_content()) };
        let mut statuses = Vec::new();
        let mut last = None;
        for _ in 0..3 {
            let mut ctx = RequestContext::new(Method::GET, "/api/intrusions");
            ctx.remote_addr = Some("198.51.100.7".into());
            let res = chain.compose(&handler).run(&mut ctx).unwrap();
            statuses.push(res.status);
            last = Some(res);
        }
        assert_eq!(statuses, vec![204, 204, 429]);
        let limited = last.unwrap();
        assert_eq!(limited.get_header("x-ratelimit-limit"), Some("2"));
        assert!(limited.get_header("retry-after").is_some());
    }

    #[test]
    fn tiny_refill_rate_limits_instead_of_failing() {
        let mw = RateLimitMiddleware::new(quota(1, 1e-30)).key_strategy(KeyStrategy::Global);
        let chain = MiddlewareChain::new().with(Arc::new(mw));
        let handler = |_: &RequestContext| -> HandlerResult { Ok(HandlerResponse::no_content()) };
        let run = || {
            let mut ctx = RequestContext::new(Method::GET, "/api/intrusions");
            chain.compose(&handler).run(&mut ctx).unwrap()
        };
        assert_eq!(run().status, 204);
        let limited = run();
        assert_eq!(limited.status, 429);
        assert_eq!(limited.get_header("retry-after"), Some(u64::MAX.to_string().as_str()));
    }

    #[test]
    fn concurrent_acquires_never_overspend() {
        let store = Arc::new(TokenBucketStore::new());
        let q = quota(100, 0.0001);
        let now = Instant::now();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    (0..50)
                        .filter(|_| matches!(store.acquire("shared", &q, now), RateDecision::Allowed { .. }))
                        .count()
                })
            })
            .collect();
        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 100);
    }
}

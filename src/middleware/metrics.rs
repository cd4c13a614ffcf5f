use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

use super::{Middleware, Next};
use crate::context::RequestContext;
use crate::handler::HandlerResult;

/// Request counters shared by every dispatch thread.
///
/// All counters use relaxed atomics: the numbers are eventually consistent
/// and never block a request.
#[derive(Default)]
pub struct MetricsMiddleware {
    request_count: AtomicUsize,
    total_latency_ns: AtomicU64,
    status_2xx: AtomicUsize,
    status_3xx: AtomicUsize,
    status_4xx: AtomicUsize,
    status_5xx: AtomicUsize,
    auth_failures: AtomicUsize,
    rate_limited: AtomicUsize,
    errors: AtomicUsize,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub requests: usize,
    pub average_latency_us: u64,
    pub status_2xx: usize,
    pub status_3xx: usize,
    pub status_4xx: usize,
    pub status_5xx: usize,
    pub auth_failures: usize,
    pub rate_limited: usize,
    pub errors: usize,
}

impl MetricsMiddleware {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the total number of requests processed
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Mean processing time, zero before the first request.
    #[must_use]
    pub fn average_latency(&self) -> Duration {
        let count = self.request_count.load(Ordering::Relaxed) as u64;
        if count == 0 {
            Duration::from_nanos(0)
        } else {
            Duration::from_nanos(self.total_latency_ns.load(Ordering::Relaxed) / count)
        }
    }

    /// Responses answered `401`
    #[must_use]
    pub fn auth_failures(&self) -> usize {
        self.auth_failures.load(Ordering::Relaxed)
    }

    /// Dispatches that ended in an error rather than a response
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.errors.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.request_count(),
            average_latency_us: self.average_latency().as_micros() as u64,
            status_2xx: self.status_2xx.load(Ordering::Relaxed),
            status_3xx: self.status_3xx.load(Ordering::Relaxed),
            status_4xx: self.status_4xx.load(Ordering::Relaxed),
            status_5xx: self.status_5xx.load(Ordering::Relaxed),
            auth_failures: self.auth_failures(),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            errors: self.error_count(),
        }
    }

    fn record_status(&self, status: u16) {
        let bucket = match status {
            200..=299 => &self.status_2xx,
            300..=399 => &self.status_3xx,
            400..=499 => &self.status_4xx,
            _ => &self.status_5xx,
        };
        bucket.fetch_add(1, Ordering::Relaxed);
        match status {
            401 => {
                self.auth_failures.fetch_add(1, Ordering::Relaxed);
            }
            429 => {
                self.rate_limited.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }
}

impl Middleware for MetricsMiddleware {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> HandlerResult {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();
        let result = next.run(ctx);
        self.total_latency_ns
            .fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
        match &result {
            Ok(res) => self.record_status(res.status),
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                self.record_status(e.status_code());
            }
        }
        result
    }
}

//! # Middleware Module
//!
//! Cross-cutting request processing wrapped around route handlers.
//!
//! ## Overview
//!
//! A middleware sees the [`RequestContext`](crate::context::RequestContext) before
//! the handler, decides whether to continue, and sees the outcome afterwards.
//! Middlewares are registered on the dispatcher in order; the first one registered
//! is the outermost layer:
//!
//! ```text
//! [Tracing, Cors, Auth] around handler:
//!
//! Tracing ─▶ Cors ─▶ Auth ─▶ handler
//! Tracing ◀─ Cors ◀─ Auth ◀─────┘
//! ```
//!
//! Any layer may answer on its own without calling `next` (CORS preflight,
//! missing credentials, rate limit) and the layers inside it never run.
//!
//! ## Built-in middlewares
//!
//! - [`CorsMiddleware`] - origin checks and `OPTIONS` preflight answers
//! - [`SecurityMiddleware`] - `405`/`415` request checks, hardened response headers
//! - [`RateLimitMiddleware`] - token buckets behind a pluggable [`RateLimitStore`]
//! - [`AuthMiddleware`] - bearer tokens checked by a [`TokenValidator`](crate::security::TokenValidator)
//! - [`SanitizeMiddleware`] - escapes and trims parameters and JSON strings
//! - [`TracingMiddleware`] - per-request span and completion log
//! - [`MetricsMiddleware`] - lock-free request counters
//!
//! ## Custom middleware
//!
//! ```rust
//! use sentryroute::middleware::{Middleware, Next};
//! use sentryroute::{HandlerResult, RequestContext};
//!
//! struct ApiVersion;
//!
//! impl Middleware for ApiVersion {
//!     fn name(&self) -> &'static str {
//!         "api_version"
//!     }
//!
//!     fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> HandlerResult {
//!         let mut res = next.run(ctx)?;
//!         res.set_header("x-api-version", "1".to_string());
//!         Ok(res)
//!     }
//! }
//! ```

mod auth;
mod core;
mod cors;
mod metrics;
mod rate_limit;
mod sanitize;
mod security_headers;
mod tracing;

pub use auth::AuthMiddleware;
pub use self::core::{compose, Composed, Middleware, MiddlewareChain, Next};
pub use cors::{CorsConfigError, CorsMiddleware, CorsMiddlewareBuilder, OriginValidation};
pub use metrics::{MetricsMiddleware, MetricsSnapshot};
pub use rate_limit::{
    KeyStrategy, Quota, QuotaError, RateDecision, RateLimitMiddleware, RateLimitStore,
    TokenBucketStore,
};
pub use sanitize::SanitizeMiddleware;
pub use security_headers::SecurityMiddleware;
pub use self::tracing::TracingMiddleware;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use super::{Middleware, Next};
use crate::context::RequestContext;
use crate::error::{AuthError, InvalidPatternError, Rejection};
use crate::handler::HandlerResult;
use crate::router::PathPattern;
use crate::security::TokenValidator;

/// A path that skips authentication.
#[derive(Debug)]
enum Exclusion {
    /// `"/public/*"` style entry: every path starting with the prefix
    Prefix(String),
    /// Exact path or route pattern such as `/docs/{page}`
    Pattern(PathPattern),
}

impl Exclusion {
    fn parse(entry: &str) -> Result<Self, InvalidPatternError> {
        match entry.strip_suffix('*') {
            Some(prefix) if prefix.ends_with('/') => Ok(Exclusion::Prefix(prefix.to_string())),
            _ => PathPattern::compile(entry).map(Exclusion::Pattern),
        }
    }

    fn covers(&self, path: &str) -> bool {
        match self {
            Exclusion::Prefix(prefix) => path.starts_with(prefix.as_str()),
            Exclusion::Pattern(pattern) => pattern.matches(path).is_some(),
        }
    }
}

/// Bearer-token authentication.
///
/// Reads `Authorization: Bearer <token>` (or a custom header carrying the bare
/// token), asks the [`TokenValidator`] and attaches the resulting
/// [`Principal`](crate::context::Principal) to the context. Any failure is
/// answered with `401` and the handler is not run. Paths on the exclusion list
/// pass through without credentials.
pub struct AuthMiddleware {
    validator: Arc<dyn TokenValidator>,
    exclusions: Vec<Exclusion>,
    header_name: String,
    failures: AtomicUsize,
}

impl AuthMiddleware {
    pub fn new(validator: Arc<dyn TokenValidator>) -> Self {
        Self {
            validator,
            exclusions: Vec::new(),
            header_name: "authorization".to_string(),
            failures: AtomicUsize::new(0),
        }
    }

    /// Skip authentication for these paths.
    ///
    /// An entry ending in `/*` excludes everything below that prefix; any other
    /// entry is a route pattern (`/api/health`, `/docs/{page}`).
    ///
    /// # Errors
    ///
    /// [`InvalidPatternError`] if an entry is not a valid route pattern.
    pub fn exclude_paths(mut self, paths: &[&str]) -> Result<Self, InvalidPatternError> {
        for p in paths {
            self.exclusions.push(Exclusion::parse(p)?);
        }
        Ok(self)
    }

    /// Read the bare token from `name` instead of `Authorization: Bearer`.
    #[must_use]
    pub fn header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = name.into().to_ascii_lowercase();
        self
    }

    #[must_use]
    pub fn is_excluded(&self, path: &str) -> bool {
        self.exclusions.iter().any(|e| e.covers(path))
    }

    /// Requests rejected so far.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    fn extract_token<'a>(&self, ctx: &'a RequestContext) -> Result<&'a str, AuthError> {
        let raw = ctx
            .header(&self.header_name)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(AuthError::MissingCredentials)?;
        if self.header_name != "authorization" {
            return Ok(raw);
        }
        match raw.split_once(' ') {
            Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") => {
                let token = token.trim();
                if token.is_empty() {
                    Err(AuthError::MissingCredentials)
                } else {
                    Ok(token)
                }
            }
            _ => Err(AuthError::MalformedCredentials),
        }
    }
}

impl Middleware for AuthMiddleware {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> HandlerResult {
        if self.is_excluded(&ctx.path) {
            debug!(path = %ctx.path, "Auth skipped for excluded path");
            return next.run(ctx);
        }

        let outcome = self
            .extract_token(ctx)
            .and_then(|token| self.validator.validate(token));
        match outcome {
            Ok(principal) => {
                debug!(subject = %principal.subject, path = %ctx.path, "Request authenticated");
                ctx.set_identity(principal);
                next.run(ctx)
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                match e {
                    AuthError::MissingCredentials => {
                        debug!(method = %ctx.method, path = %ctx.path, "Missing credentials")
                    }
                    ref other => warn!(
                        method = %ctx.method,
                        path = %ctx.path,
                        request_id = %ctx.request_id,
                        reason = %other,
                        "Authentication failed"
                    ),
                }
                Ok(Rejection::Unauthorized(e).into_response())
            }
        }
    }
}

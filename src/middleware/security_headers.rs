use http::Method;
use tracing::warn;

use super::{Middleware, Next};
use crate::context::{HandlerResponse, RequestContext};
use crate::error::Rejection;
use crate::handler::HandlerResult;

/// Request hygiene and hardened response headers.
///
/// - Methods outside `allowed_methods` are answered with `405` and an `Allow` header.
/// - `POST`/`PUT`/`PATCH` requests that declare a content type or carry a body
///   must use one of `allowed_content_types`, otherwise `415`.
/// - Every response leaving through this middleware, rejections included, gets
///   the configured security headers unless the handler already set them.
#[derive(Debug, Clone)]
pub struct SecurityMiddleware {
    allowed_methods: Vec<Method>,
    allowed_content_types: Vec<String>,
    headers: Vec<(&'static str, String)>,
}

impl Default for SecurityMiddleware {
    fn default() -> Self {
        Self {
            allowed_methods: vec![
                Method::GET,
                Method::HEAD,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ],
            allowed_content_types: vec!["application/json".to_string()],
            headers: vec![
                ("x-content-type-options", "nosniff".to_string()),
                ("x-frame-options", "DENY".to_string()),
                ("referrer-policy", "no-referrer".to_string()),
                (
                    "content-security-policy",
                    "default-src 'none'; frame-ancestors 'none'".to_string(),
                ),
            ],
        }
    }
}

impl SecurityMiddleware {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn allowed_methods(mut self, methods: &[Method]) -> Self {
        self.allowed_methods = methods.to_vec();
        self
    }

    /// Media types accepted for request bodies, compared without parameters
    /// (`application/json; charset=utf-8` counts as `application/json`).
    #[must_use]
    pub fn allowed_content_types(mut self, types: &[&str]) -> Self {
        self.allowed_content_types = types.iter().map(|t| t.to_ascii_lowercase()).collect();
        self
    }

    #[must_use]
    pub fn content_security_policy(self, policy: impl Into<String>) -> Self {
        self.header("content-security-policy", policy.into())
    }

    #[must_use]
    pub fn frame_options(self, value: impl Into<String>) -> Self {
        self.header("x-frame-options", value.into())
    }

    /// Add `Strict-Transport-Security` with `includeSubDomains`.
    #[must_use]
    pub fn hsts(self, max_age_secs: u64) -> Self {
        self.header(
            "strict-transport-security",
            format!("max-age={max_age_secs}; includeSubDomains"),
        )
    }

    fn header(mut self, name: &'static str, value: String) -> Self {
        match self.headers.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.headers.push((name, value)),
        }
        self
    }

    fn has_body_semantics(method: &Method) -> bool {
        matches!(*method, Method::POST | Method::PUT | Method::PATCH)
    }

    fn check(&self, ctx: &RequestContext) -> Option<Rejection> {
        if !self.allowed_methods.contains(&ctx.method) {
            return Some(Rejection::MethodNotAllowed {
                method: ctx.method.clone(),
                allowed: self.allowed_methods.clone(),
            });
        }

        if Self::has_body_semantics(&ctx.method) {
            let declared = ctx.header("content-type");
            if declared.is_none() && ctx.body.is_none() {
                return None;
            }
            let accepted = declared
                .and_then(|ct| ct.split(';').next())
                .map(|mime| mime.trim().to_ascii_lowercase())
                .is_some_and(|mime| self.allowed_content_types.contains(&mime));
            if !accepted {
                return Some(Rejection::UnsupportedMediaType {
                    content_type: declared.map(str::to_string),
                });
            }
        }
        None
    }

    fn harden(&self, res: &mut HandlerResponse) {
        for (name, value) in &self.headers {
            res.set_header_if_absent(name, value.clone());
        }
    }
}

impl Middleware for SecurityMiddleware {
    fn name(&self) -> &'static str {
        "security"
    }

    fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> HandlerResult {
        if let Some(rejection) = self.check(ctx) {
            warn!(
                method = %ctx.method,
                path = %ctx.path,
                status = rejection.status(),
                reason = %rejection,
                "Request rejected by security policy"
            );
            let mut res = rejection.into_response();
            self.harden(&mut res);
            return Ok(res);
        }
        let mut res = next.run(ctx)?;
        self.harden(&mut res);
        Ok(res)
    }
}

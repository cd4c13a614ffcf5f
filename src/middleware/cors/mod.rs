mod builder;
mod error;

pub use builder::CorsMiddlewareBuilder;
pub use error::CorsConfigError;

use std::sync::Arc;

use http::Method;
use regex::Regex;
use tracing::{debug, warn};

use crate::context::{HandlerResponse, RequestContext};
use crate::error::{join_methods, Rejection};
use crate::handler::HandlerResult;
use crate::middleware::{Middleware, Next};

/// Origin validation strategy
#[derive(Clone)]
pub enum OriginValidation {
    /// Exact string matching
    Exact(Vec<String>),
    /// Wildcard (allow all origins)
    Wildcard,
    /// Regex pattern matching
    Regex(Vec<Regex>),
    /// Custom validation function
    Custom(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl std::fmt::Debug for OriginValidation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OriginValidation::Exact(origins) => f.debug_tuple("Exact").field(origins).finish(),
            OriginValidation::Wildcard => write!(f, "Wildcard"),
            OriginValidation::Regex(patterns) => f
                .debug_tuple("Regex")
                .field(&patterns.iter().map(|re| re.as_str()).collect::<Vec<_>>())
                .finish(),
            OriginValidation::Custom(_) => write!(f, "Custom(<function>)"),
        }
    }
}

impl OriginValidation {
    fn is_allowed(&self, origin: &str) -> bool {
        match self {
            OriginValidation::Exact(origins) => origins.iter().any(|o| o == origin),
            OriginValidation::Wildcard => true,
            OriginValidation::Regex(patterns) => patterns.iter().any(|re| re.is_match(origin)),
            OriginValidation::Custom(validator) => validator(origin),
        }
    }

    fn is_wildcard(&self) -> bool {
        matches!(self, OriginValidation::Wildcard)
    }
}

/// CORS (Cross-Origin Resource Sharing) middleware
///
/// # Behavior
///
/// - **`OPTIONS` never reaches the handler.** With an allowed `Origin` the
///   middleware answers `204` plus the preflight headers; with a disallowed one
///   it answers `403`; without an `Origin` it answers `204` with an `Allow` header.
/// - **Other methods** from a disallowed origin get `403`. Allowed (or
///   origin-less) requests run the rest of the chain and the response is
///   decorated with `Access-Control-Allow-Origin`, `Vary: Origin` and, when
///   configured, credentials and exposed headers.
///
/// A preflight asking for a method or header outside the configured lists is
/// refused with `403`.
///
/// # Credentials
///
/// Wildcard origin (`*`) and credentials are mutually exclusive;
/// [`CorsMiddlewareBuilder::build`] refuses that combination.
pub struct CorsMiddleware {
    pub(crate) origin_validation: OriginValidation,
    pub(crate) allowed_headers: Vec<String>,
    pub(crate) allowed_methods: Vec<Method>,
    pub(crate) allow_credentials: bool,
    pub(crate) expose_headers: Vec<String>,
    pub(crate) max_age: Option<u32>,
}

impl CorsMiddleware {
    /// Allow origins accepted by `validator`.
    pub fn with_custom_validator<F>(validator: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self {
            origin_validation: OriginValidation::Custom(Arc::new(validator)),
            ..Self::default()
        }
    }

    /// Permissive policy for local development: any origin, no credentials.
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            origin_validation: OriginValidation::Wildcard,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn allowed_methods(&self) -> &[Method] {
        &self.allowed_methods
    }

    /// Value for `Access-Control-Allow-Origin`, or `None` for a disallowed origin.
    fn allow_origin_value(&self, origin: &str) -> Option<String> {
        if !self.origin_validation.is_allowed(origin) {
            return None;
        }
        if self.origin_validation.is_wildcard() {
            Some("*".to_string())
        } else {
            Some(origin.to_string())
        }
    }

    fn preflight(&self, ctx: &RequestContext, allow_origin: String) -> HandlerResponse {
        if let Some(requested) = ctx.header("access-control-request-method") {
            let allowed = requested
                .trim()
                .parse::<Method>()
                .map(|m| self.allowed_methods.contains(&m))
                .unwrap_or(false);
            if !allowed {
                warn!(requested_method = %requested, "CORS preflight: method not allowed");
                return HandlerResponse::error(403, "CORS preflight rejected");
            }
        }

        let allow_all_headers = self.allowed_headers.iter().any(|h| h == "*");
        let requested_headers = ctx.header("access-control-request-headers");
        if let (Some(list), false) = (requested_headers, allow_all_headers) {
            for header in list.split(',').map(str::trim).filter(|h| !h.is_empty()) {
                if !self.allowed_headers.iter().any(|h| h.eq_ignore_ascii_case(header)) {
                    warn!(header = %header, "CORS preflight: header not allowed");
                    return HandlerResponse::error(403, "CORS preflight rejected");
                }
            }
        }

        let mut res = HandlerResponse::no_content();
        res.set_header("access-control-allow-origin", allow_origin);
        res.set_header("access-control-allow-methods", join_methods(&self.allowed_methods));
        let allow_headers = match (allow_all_headers, requested_headers) {
            (true, Some(requested)) => requested.to_string(),
            _ => self.allowed_headers.join(", "),
        };
        res.set_header("access-control-allow-headers", allow_headers);
        if self.allow_credentials {
            res.set_header("access-control-allow-credentials", "true".to_string());
        }
        if let Some(age) = self.max_age {
            res.set_header("access-control-max-age", age.to_string());
        }
        res.set_header("vary", "Origin".to_string());
        res
    }

    fn decorate(&self, res: &mut HandlerResponse, allow_origin: String) {
        res.set_header("access-control-allow-origin", allow_origin);
        res.set_header("vary", "Origin".to_string());
        if self.allow_credentials {
            res.set_header("access-control-allow-credentials", "true".to_string());
        }
        if !self.expose_headers.is_empty() {
            res.set_header("access-control-expose-headers", self.expose_headers.join(", "));
        }
    }
}

/// Secure default: no origins allowed until configured.
impl Default for CorsMiddleware {
    fn default() -> Self {
        Self {
            origin_validation: OriginValidation::Exact(vec![]),
            allowed_headers: vec!["Content-Type".into(), "Authorization".into()],
            allowed_methods: vec![
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ],
            allow_credentials: false,
            expose_headers: vec![],
            max_age: None,
        }
    }
}

impl Middleware for CorsMiddleware {
    fn name(&self) -> &'static str {
        "cors"
    }

    fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> HandlerResult {
        let origin = ctx.header("origin").map(str::to_string);
        let allow_origin = match origin.as_deref() {
            Some(o) => match self.allow_origin_value(o) {
                Some(v) => Some(v),
                None => {
                    warn!(origin = %o, method = %ctx.method, path = %ctx.path, "CORS: origin not allowed");
                    return Ok(Rejection::OriginNotAllowed {
                        origin: o.to_string(),
                    }
                    .into_response());
                }
            },
            None => None,
        };

        if ctx.method == Method::OPTIONS {
            debug!(path = %ctx.path, origin = ?origin, "CORS: answering OPTIONS");
            return Ok(match allow_origin {
                Some(value) => self.preflight(ctx, value),
                None => {
                    let mut res = HandlerResponse::no_content();
                    res.set_header("allow", join_methods(&self.allowed_methods));
                    res
                }
            });
        }

        let mut res = next.run(ctx)?;
        if let Some(value) = allow_origin {
            self.decorate(&mut res, value);
        }
        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HandlerResponse;
    use crate::middleware::MiddlewareChain;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request(method: Method, origin: Option<&str>) -> RequestContext {
        let mut ctx = RequestContext::new(method, "/api/intrusions");
        if let Some(o) = origin {
            ctx.headers.push((Arc::from("Origin"), o.to_string()));
        }
        ctx
    }

    fn cors() -> CorsMiddleware {
        CorsMiddlewareBuilder::new()
            .allowed_origins(&["https://soc.example.com"])
            .expose_headers(&["X-RateLimit-Remaining"])
            .max_age(600)
            .build()
            .unwrap()
    }

    fn run(mw: CorsMiddleware, mut ctx: RequestContext, calls: &AtomicUsize) -> HandlerResponse {
        let chain = MiddlewareChain::new().with(Arc::new(mw));
        let handler = |_: &RequestContext| -> HandlerResult {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(HandlerResponse::ok(serde_json::json!({ "ok": true })))
        };
        chain.compose(&handler).run(&mut ctx).unwrap()
    }

    #[test]
    fn preflight_short_circuits() {
        let calls = AtomicUsize::new(0);
        let mut ctx = request(Method::OPTIONS, Some("https://soc.example.com"));
        ctx.headers
            .push((Arc::from("access-control-request-method"), "POST".into()));
        let res = run(cors(), ctx, &calls);
        assert_eq!(res.status, 204);
        assert_eq!(
            res.get_header("access-control-allow-origin"),
            Some("https://soc.example.com")
        );
        assert_eq!(res.get_header("access-control-max-age"), Some("600"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn options_without_origin_still_short_circuits() {
        let calls = AtomicUsize::new(0);
        let res = run(cors(), request(Method::OPTIONS, None), &calls);
        assert_eq!(res.status, 204);
        assert!(res.get_header("allow").is_some_and(|a| a.contains("GET")));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn disallowed_origin_is_forbidden() {
        let calls = AtomicUsize::new(0);
        let res = run(cors(), request(Method::GET, Some("https://evil.example")), &calls);
        assert_eq!(res.status, 403);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let res = run(cors(), request(Method::OPTIONS, Some("https://evil.example")), &calls);
        assert_eq!(res.status, 403);
    }

    #[test]
    fn preflight_with_unlisted_header_is_refused() {
        let calls = AtomicUsize::new(0);
        let mut ctx = request(Method::OPTIONS, Some("https://soc.example.com"));
        ctx.headers
            .push((Arc::from("access-control-request-headers"), "X-Secret".into()));
        assert_eq!(run(cors(), ctx, &calls).status, 403);
    }

    #[test]
    fn simple_request_is_decorated() {
        let calls = AtomicUsize::new(0);
        let res = run(cors(), request(Method::GET, Some("https://soc.example.com")), &calls);
        assert_eq!(res.status, 200);
        assert_eq!(res.get_header("vary"), Some("Origin"));
        assert_eq!(
            res.get_header("access-control-expose-headers"),
            Some("X-RateLimit-Remaining")
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn same_origin_request_passes_untouched() {
        let calls = AtomicUsize::new(0);
        let res = run(cors(), request(Method::GET, None), &calls);
        assert!(res.get_header("access-control-allow-origin").is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn permissive_answers_star() {
        let calls = AtomicUsize::new(0);
        let res = run(
            CorsMiddleware::permissive(),
            request(Method::GET, Some("http://localhost:5173")),
            &calls,
        );
        assert_eq!(res.get_header("access-control-allow-origin"), Some("*"));
    }

    #[test]
    fn custom_validator() {
        let calls = AtomicUsize::new(0);
        let mw = CorsMiddleware::with_custom_validator(|o| o.ends_with(".example.com"));
        let res = run(mw, request(Method::GET, Some("https://a.example.com")), &calls);
        assert_eq!(res.status, 200);
    }
}

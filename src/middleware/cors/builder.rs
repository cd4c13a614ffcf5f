use http::Method;
use regex::Regex;

use super::{CorsConfigError, CorsMiddleware, OriginValidation};

/// Builder for creating `CorsMiddleware` with a fluent API
///
/// # Example
///
/// ```rust
/// use sentryroute::middleware::CorsMiddlewareBuilder;
/// use http::Method;
///
/// let cors = CorsMiddlewareBuilder::new()
///     .allowed_origins(&["https://soc.example.com", "https://ops.example.com"])
///     .allowed_methods(&[Method::GET, Method::POST, Method::PUT])
///     .allowed_headers(&["Content-Type", "Authorization", "X-Request-Id"])
///     .allow_credentials(true)
///     .expose_headers(&["X-RateLimit-Remaining"])
///     .max_age(3600)
///     .build()
///     .expect("valid CORS configuration");
/// ```
pub struct CorsMiddlewareBuilder {
    allowed_origins: Vec<String>,
    origin_patterns: Vec<String>,
    allowed_headers: Vec<String>,
    allowed_methods: Vec<Method>,
    allow_credentials: bool,
    expose_headers: Vec<String>,
    max_age: Option<u32>,
}

impl CorsMiddlewareBuilder {
    /// Create a new builder with secure defaults
    ///
    /// - No origins allowed
    /// - Headers: `["Content-Type", "Authorization"]`
    /// - Methods: `GET, POST, PUT, PATCH, DELETE, OPTIONS`
    /// - No credentials, no exposed headers, no preflight caching
    #[must_use]
    pub fn new() -> Self {
        Self {
            allowed_origins: vec![],
            origin_patterns: vec![],
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

    /// Set allowed origins. `&["*"]` allows every origin and cannot be
    /// combined with credentials.
    #[must_use]
    pub fn allowed_origins(mut self, origins: &[&str]) -> Self {
        self.allowed_origins = origins.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Allow origins matching any of these regexes
    /// (e.g. `r"^https://[a-z0-9-]+\.example\.com$"`). Takes precedence over
    /// `allowed_origins`.
    #[must_use]
    pub fn allowed_origin_patterns(mut self, patterns: &[&str]) -> Self {
        self.origin_patterns = patterns.iter().map(|s| s.to_string()).collect();
        self
    }

    #[must_use]
    pub fn allowed_methods(mut self, methods: &[Method]) -> Self {
        self.allowed_methods = methods.to_vec();
        self
    }

    /// Set allowed request headers. `&["*"]` allows any header.
    #[must_use]
    pub fn allowed_headers(mut self, headers: &[&str]) -> Self {
        self.allowed_headers = headers.iter().map(|s| s.to_string()).collect();
        self
    }

    #[must_use]
    pub fn allow_credentials(mut self, allow: bool) -> Self {
        self.allow_credentials = allow;
        self
    }

    /// Response headers readable by browser scripts
    #[must_use]
    pub fn expose_headers(mut self, headers: &[&str]) -> Self {
        self.expose_headers = headers.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Preflight cache duration in seconds
    #[must_use]
    pub fn max_age(mut self, seconds: u32) -> Self {
        self.max_age = Some(seconds);
        self
    }

    /// Validate the configuration and build the middleware.
    ///
    /// # Errors
    ///
    /// - `WildcardWithCredentials` for `*` together with credentials
    /// - `EmptyOriginsWithCredentials` for credentials without origins
    /// - `InvalidOriginFormat` for an origin that is not `scheme://host[:port]`
    /// - `InvalidOriginPattern` for a regex that does not compile
    pub fn build(self) -> Result<CorsMiddleware, CorsConfigError> {
        let origin_validation = if !self.origin_patterns.is_empty() {
            let patterns = self
                .origin_patterns
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| CorsConfigError::InvalidOriginPattern {
                        pattern: p.clone(),
                        reason: e.to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            OriginValidation::Regex(patterns)
        } else if self.allowed_origins.iter().any(|o| o == "*") {
            OriginValidation::Wildcard
        } else {
            for origin in &self.allowed_origins {
                validate_origin_format(origin)?;
            }
            OriginValidation::Exact(self.allowed_origins)
        };

        if self.allow_credentials {
            match &origin_validation {
                OriginValidation::Wildcard => return Err(CorsConfigError::WildcardWithCredentials),
                OriginValidation::Exact(list) if list.is_empty() => {
                    return Err(CorsConfigError::EmptyOriginsWithCredentials)
                }
                _ => {}
            }
        }

        Ok(CorsMiddleware {
            origin_validation,
            allowed_headers: self.allowed_headers,
            allowed_methods: self.allowed_methods,
            allow_credentials: self.allow_credentials,
            expose_headers: self.expose_headers,
            max_age: self.max_age,
        })
    }
}

impl Default for CorsMiddlewareBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// An origin is `scheme://host[:port]` with no path, query or fragment.
fn validate_origin_format(origin: &str) -> Result<(), CorsConfigError> {
    let invalid = || CorsConfigError::InvalidOriginFormat {
        origin: origin.to_string(),
    };
    let (scheme, rest) = origin.split_once("://").ok_or_else(invalid)?;
    if !matches!(scheme, "http" | "https") || rest.is_empty() || rest.contains(['/', '?', '#']) {
        return Err(invalid());
    }
    let parsed = url::Url::parse(origin).map_err(|_| invalid())?;
    if parsed.host_str().is_none() {
        return Err(invalid());
    }
    Ok(())
}

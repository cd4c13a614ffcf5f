//! # Configuration Module
//!
//! Builds the middleware stack from a YAML file plus a few environment
//! overrides.
//!
//! ## Layout
//!
//! Every section is optional and has an `enabled` flag. Missing sections take
//! their defaults: security headers and sanitization are on, everything else
//! is off.
//!
//! ```yaml
//! metrics:
//!   enabled: true
//! cors:
//!   enabled: true
//!   allowed_origins: ["https://soc.example.com"]
//!   allow_credentials: true
//!   max_age: 3600
//! security:
//!   hsts_max_age: 31536000
//! rate_limit:
//!   enabled: true
//!   capacity: 100
//!   refill_per_sec: 10
//!   key: identity_or_client
//! auth:
//!   enabled: true
//!   exclude: ["/api/health", "/public/*"]
//!   jwt:
//!     secret: change-me
//!     issuer: sentry
//!   static_tokens:
//!     - token: ops-token
//!       subject: ops-bot
//!       scopes: [read]
//! sanitize:
//!   max_len: 4096
//! ```
//!
//! ## Stack order
//!
//! [`AppConfig::build_middlewares`] always produces the same order, first entry
//! outermost:
//!
//! ```text
//! Tracing, Metrics?, Cors?, Security?, Auth?, RateLimit?, Sanitize?
//! ```
//!
//! Auth runs before the rate limiter so `key: identity_or_client` can bucket
//! by subject.
//!
//! ## Environment overrides
//!
//! | Variable | Effect |
//! |---|---|
//! | `SENTRYROUTE_JWT_SECRET` | sets `auth.jwt.secret` |
//! | `SENTRYROUTE_RATE_LIMIT_CAPACITY` | sets `rate_limit.capacity` |
//! | `SENTRYROUTE_RATE_LIMIT_REFILL` | sets `rate_limit.refill_per_sec` |

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use http::Method;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::context::Principal;
use crate::dispatcher::Dispatcher;
use crate::error::InvalidPatternError;
use crate::middleware::{
    AuthMiddleware, CorsConfigError, CorsMiddleware, CorsMiddlewareBuilder, KeyStrategy,
    MetricsMiddleware, Middleware, Quota, QuotaError, RateLimitMiddleware, SanitizeMiddleware,
    SecurityMiddleware, TokenBucketStore, TracingMiddleware,
};
use crate::security::{
    FallbackValidator, JwtValidator, RemoteTokenValidator, StaticTokenValidator, TokenValidator,
};

const ENV_JWT_SECRET: &str = "SENTRYROUTE_JWT_SECRET";
const ENV_RATE_CAPACITY: &str = "SENTRYROUTE_RATE_LIMIT_CAPACITY";
const ENV_RATE_REFILL: &str = "SENTRYROUTE_RATE_LIMIT_REFILL";

/// Startup configuration problems. None of these are recoverable.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error(transparent)]
    Cors(#[from] CorsConfigError),
    #[error("invalid rate limit: {0}")]
    RateLimit(#[from] QuotaError),
    #[error("invalid auth exclusion: {0}")]
    Pattern(#[from] InvalidPatternError),
    #[error("unknown HTTP method `{0}`")]
    InvalidMethod(String),
    #[error("invalid remote verifier url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("auth.jwt.secret must not be empty")]
    EmptyJwtSecret,
    #[error("environment variable {var} has invalid value `{value}`")]
    InvalidEnv { var: &'static str, value: String },
    #[error("auth is enabled but no token validator is configured (jwt, static_tokens or remote)")]
    MissingValidator,
}

/// Root of the YAML document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub metrics: MetricsConfig,
    pub cors: CorsConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
    pub auth: AuthConfig,
    pub sanitize: SanitizeConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    pub enabled: bool,
    /// Exact origins, or `["*"]`
    pub allowed_origins: Vec<String>,
    /// Regexes; take precedence over `allowed_origins`
    pub allowed_origin_patterns: Vec<String>,
    pub allowed_methods: Option<Vec<String>>,
    pub allowed_headers: Option<Vec<String>>,
    pub allow_credentials: bool,
    pub expose_headers: Vec<String>,
    pub max_age: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityConfig {
    pub enabled: bool,
    pub allowed_methods: Option<Vec<String>>,
    pub allowed_content_types: Option<Vec<String>>,
    pub content_security_policy: Option<String>,
    pub frame_options: Option<String>,
    pub hsts_max_age: Option<u64>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_methods: None,
            allowed_content_types: None,
            content_security_policy: None,
            frame_options: None,
            hsts_max_age: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Burst size
    pub capacity: u32,
    /// Tokens added per second
    pub refill_per_sec: f64,
    pub key: KeyStrategy,
    /// Cap on tracked keys in the in-process store
    pub max_keys: usize,
    pub idle_ttl_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            capacity: 100,
            refill_per_sec: 10.0,
            key: KeyStrategy::default(),
            max_keys: 100_000,
            idle_ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    pub enabled: bool,
    /// Paths or `/prefix/*` entries that skip authentication
    pub exclude: Vec<String>,
    /// Read a bare token from this header instead of `Authorization: Bearer`
    pub header: Option<String>,
    pub jwt: Option<JwtConfig>,
    pub static_tokens: Vec<StaticTokenConfig>,
    pub remote: Option<RemoteConfig>,
}

#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub leeway_secs: u64,
    /// Decoded-claims cache entries; 0 disables the cache
    pub cache_size: usize,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            issuer: None,
            audience: None,
            leeway_secs: 30,
            cache_size: 1024,
        }
    }
}

impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("leeway_secs", &self.leeway_secs)
            .field("cache_size", &self.cache_size)
            .finish()
    }
}

#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaticTokenConfig {
    pub token: String,
    pub subject: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl fmt::Debug for StaticTokenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticTokenConfig")
            .field("token", &"<redacted>")
            .field("subject", &self.subject)
            .field("scopes", &self.scopes)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteConfig {
    pub url: String,
    #[serde(default = "default_remote_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_remote_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Verifier answers remembered at once; 0 disables the cache
    #[serde(default = "default_remote_cache_size")]
    pub cache_size: usize,
}

fn default_remote_timeout_ms() -> u64 {
    500
}

fn default_remote_cache_ttl_secs() -> u64 {
    60
}

fn default_remote_cache_size() -> usize {
    1024
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SanitizeConfig {
    pub enabled: bool,
    pub escape_html: bool,
    pub strip_control: bool,
    /// Truncate values to this many characters
    pub max_len: Option<usize>,
    pub sanitize_body: bool,
}

impl Default for SanitizeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            escape_html: true,
            strip_control: true,
            max_len: None,
            sanitize_body: true,
        }
    }
}

impl AppConfig {
    /// Load and parse a YAML file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read, [`ConfigError::Parse`]
    /// for malformed YAML or unknown keys.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml_str(&raw)?;
        debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Parse YAML. An empty document yields the defaults.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed YAML or unknown keys.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Apply `SENTRYROUTE_*` overrides from the process environment.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidEnv`] for a value that does not parse.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|key| env::var(key).ok())
    }

    /// Same as [`apply_env_overrides`](Self::apply_env_overrides) with an injectable lookup.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidEnv`] for a value that does not parse.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secret) = lookup(ENV_JWT_SECRET).filter(|s| !s.is_empty()) {
            self.auth.jwt.get_or_insert_with(JwtConfig::default).secret = secret;
        }
        if let Some(value) = lookup(ENV_RATE_CAPACITY) {
            self.rate_limit.capacity = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: ENV_RATE_CAPACITY,
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup(ENV_RATE_REFILL) {
            self.rate_limit.refill_per_sec =
                value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                    var: ENV_RATE_REFILL,
                    value: value.clone(),
                })?;
        }
        Ok(())
    }

    /// Build the enabled middlewares, outermost first.
    ///
    /// # Errors
    ///
    /// Any [`ConfigError`] raised while validating a section.
    pub fn build_middlewares(&self) -> Result<Vec<Arc<dyn Middleware>>, ConfigError> {
        let mut stack: Vec<Arc<dyn Middleware>> = vec![Arc::new(TracingMiddleware)];
        if self.metrics.enabled {
            stack.push(Arc::new(MetricsMiddleware::new()));
        }
        if self.cors.enabled {
            stack.push(Arc::new(self.cors.build()?));
        }
        if self.security.enabled {
            stack.push(Arc::new(self.security.build()?));
        }
        if self.auth.enabled {
            stack.push(Arc::new(self.auth.build()?));
        }
        if self.rate_limit.enabled {
            stack.push(Arc::new(self.rate_limit.build()?));
        }
        if self.sanitize.enabled {
            stack.push(Arc::new(self.sanitize.build()));
        }

        let names: Vec<&str> = stack.iter().map(|m| m.name()).collect();
        info!(middlewares = ?names, "Middleware stack configured");
        Ok(stack)
    }

    /// Register the configured stack on `dispatcher`.
    ///
    /// # Errors
    ///
    /// Same as [`build_middlewares`](Self::build_middlewares); nothing is
    /// registered on error.
    pub fn install(&self, dispatcher: &mut Dispatcher) -> Result<(), ConfigError> {
        for middleware in self.build_middlewares()? {
            dispatcher.add_middleware(middleware);
        }
        Ok(())
    }
}

impl CorsConfig {
    fn build(&self) -> Result<CorsMiddleware, ConfigError> {
        let mut builder = CorsMiddlewareBuilder::new()
            .allowed_origins(&as_strs(&self.allowed_origins))
            .allowed_origin_patterns(&as_strs(&self.allowed_origin_patterns))
            .allow_credentials(self.allow_credentials)
            .expose_headers(&as_strs(&self.expose_headers));
        if let Some(methods) = &self.allowed_methods {
            builder = builder.allowed_methods(&parse_methods(methods)?);
        }
        if let Some(headers) = &self.allowed_headers {
            builder = builder.allowed_headers(&as_strs(headers));
        }
        if let Some(age) = self.max_age {
            builder = builder.max_age(age);
        }
        Ok(builder.build()?)
    }
}

impl SecurityConfig {
    fn build(&self) -> Result<SecurityMiddleware, ConfigError> {
        let mut mw = SecurityMiddleware::new();
        if let Some(methods) = &self.allowed_methods {
            mw = mw.allowed_methods(&parse_methods(methods)?);
        }
        if let Some(types) = &self.allowed_content_types {
            mw = mw.allowed_content_types(&as_strs(types));
        }
        if let Some(csp) = &self.content_security_policy {
            mw = mw.content_security_policy(csp.clone());
        }
        if let Some(frame) = &self.frame_options {
            mw = mw.frame_options(frame.clone());
        }
        if let Some(max_age) = self.hsts_max_age {
            mw = mw.hsts(max_age);
        }
        Ok(mw)
    }
}

impl RateLimitConfig {
    fn build(&self) -> Result<RateLimitMiddleware, ConfigError> {
        let quota = Quota::new(self.capacity, self.refill_per_sec)?;
        let store = TokenBucketStore::new()
            .max_keys(self.max_keys)
            .idle_ttl(Duration::from_secs(self.idle_ttl_secs));
        Ok(RateLimitMiddleware::with_store(quota, Arc::new(store)).key_strategy(self.key))
    }
}

impl AuthConfig {
    fn build(&self) -> Result<AuthMiddleware, ConfigError> {
        let mut mw =
            AuthMiddleware::new(self.validator()?).exclude_paths(&as_strs(&self.exclude))?;
        if let Some(header) = &self.header {
            mw = mw.header_name(header.clone());
        }
        Ok(mw)
    }

    /// Static tokens are checked first, then JWTs, then the remote verifier.
    fn validator(&self) -> Result<Arc<dyn TokenValidator>, ConfigError> {
        let mut chain = FallbackValidator::new();
        if !self.static_tokens.is_empty() {
            let mut tokens = StaticTokenValidator::new();
            for entry in &self.static_tokens {
                let principal =
                    Principal::new(entry.subject.clone()).with_scopes(entry.scopes.iter().cloned());
                tokens.insert(&entry.token, principal);
            }
            chain = chain.with(Arc::new(tokens));
        }
        if let Some(jwt) = &self.jwt {
            chain = chain.with(Arc::new(jwt.build()?));
        }
        if let Some(remote) = &self.remote {
            chain = chain.with(Arc::new(remote.build()?));
        }
        if chain.is_empty() {
            return Err(ConfigError::MissingValidator);
        }
        Ok(Arc::new(chain))
    }
}

impl JwtConfig {
    fn build(&self) -> Result<JwtValidator, ConfigError> {
        if self.secret.trim().is_empty() {
            return Err(ConfigError::EmptyJwtSecret);
        }
        let mut validator = JwtValidator::hs256(self.secret.as_bytes())
            .leeway(self.leeway_secs)
            .with_cache(self.cache_size);
        if let Some(iss) = &self.issuer {
            validator = validator.issuer(iss.clone());
        }
        if let Some(aud) = &self.audience {
            validator = validator.audience(aud.clone());
        }
        Ok(validator)
    }
}

impl RemoteConfig {
    fn build(&self) -> Result<RemoteTokenValidator, ConfigError> {
        url::Url::parse(&self.url).map_err(|e| ConfigError::InvalidUrl {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;
        Ok(RemoteTokenValidator::new(self.url.clone())
            .timeout(Duration::from_millis(self.timeout_ms))
            .cache_ttl(Duration::from_secs(self.cache_ttl_secs))
            .cache_size(self.cache_size))
    }
}

impl SanitizeConfig {
    fn build(&self) -> SanitizeMiddleware {
        let mw = SanitizeMiddleware::new()
            .escape_html(self.escape_html)
            .strip_control(self.strip_control)
            .sanitize_body(self.sanitize_body);
        match self.max_len {
            Some(max) => mw.max_len(max),
            None => mw,
        }
    }
}

fn as_strs(values: &[String]) -> Vec<&str> {
    values.iter().map(String::as_str).collect()
}

fn parse_methods(names: &[String]) -> Result<Vec<Method>, ConfigError> {
    names
        .iter()
        .map(|name| match name.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::GET),
            "HEAD" => Ok(Method::HEAD),
            "POST" => Ok(Method::POST),
            "PUT" => Ok(Method::PUT),
            "PATCH" => Ok(Method::PATCH),
            "DELETE" => Ok(Method::DELETE),
            "OPTIONS" => Ok(Method::OPTIONS),
            "TRACE" => Ok(Method::TRACE),
            "CONNECT" => Ok(Method::CONNECT),
            _ => Err(ConfigError::InvalidMethod(name.clone())),
        })
        .collect()
}

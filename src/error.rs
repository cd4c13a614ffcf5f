//! Error taxonomy for registration, dispatch and middleware rejections.
//!
//! Structural failures (malformed pattern, no matching route) are typed errors
//! returned through `Result`. Request rejections raised by middleware are
//! [`Rejection`] values that are turned into a response on the spot, so they
//! never cross the chain as errors.

use std::time::Duration;

use http::Method;
use serde_json::json;
use thiserror::Error;

use crate::context::HandlerResponse;

/// What exactly is wrong with a route pattern.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternErrorKind {
    #[error("pattern must start with '/'")]
    MissingLeadingSlash,
    #[error("unterminated placeholder starting at byte {0}")]
    Unterminated(usize),
    #[error("empty placeholder name at byte {0}")]
    EmptyName(usize),
    #[error("invalid placeholder name `{0}`")]
    InvalidName(String),
    #[error("duplicate placeholder name `{0}`")]
    DuplicateName(String),
    #[error("unmatched '}}' at byte {0}")]
    UnmatchedClose(usize),
    #[error("placeholders must be separated by literal text (byte {0})")]
    AdjacentPlaceholders(usize),
    #[error("pattern does not compile: {0}")]
    Compile(String),
}

/// A route pattern that cannot be compiled. Raised at registration time only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid route pattern `{pattern}`: {kind}")]
pub struct InvalidPatternError {
    pub pattern: String,
    pub kind: PatternErrorKind,
}

impl InvalidPatternError {
    pub(crate) fn new(pattern: &str, kind: PatternErrorKind) -> Self {
        Self {
            pattern: pattern.to_string(),
            kind,
        }
    }
}

/// Failure reported by a [`TokenValidator`](crate::security::TokenValidator).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing credentials")]
    MissingCredentials,
    #[error("malformed credentials")]
    MalformedCredentials,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("token expired")]
    Expired,
    #[error("token validation timed out")]
    Timeout,
    #[error("token validation unavailable: {0}")]
    Unavailable(String),
}

/// Reasons a middleware answers a request itself instead of calling the rest of the chain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("unauthorized: {0}")]
    Unauthorized(#[from] AuthError),
    #[error("origin `{origin}` is not allowed")]
    OriginNotAllowed { origin: String },
    #[error("method {method} is not allowed")]
    MethodNotAllowed { method: Method, allowed: Vec<Method> },
    #[error("unsupported media type {}", .content_type.as_deref().unwrap_or("<none>"))]
    UnsupportedMediaType { content_type: Option<String> },
    #[error("rate limit of {limit} requests exceeded")]
    RateLimitExceeded { limit: u32, retry_after: Duration },
}

impl Rejection {
    /// HTTP status a host should answer with.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Rejection::Unauthorized(_) => 401,
            Rejection::OriginNotAllowed { .. } => 403,
            Rejection::MethodNotAllowed { .. } => 405,
            Rejection::UnsupportedMediaType { .. } => 415,
            Rejection::RateLimitExceeded { .. } => 429,
        }
    }

    /// Render the rejection as a terminal response.
    ///
    /// Credential failures are reported without detail; the precise
    /// [`AuthError`] only goes to the logs.
    #[must_use]
    pub fn into_response(self) -> HandlerResponse {
        let status = self.status();
        let message = match &self {
            Rejection::Unauthorized(_) => "unauthorized".to_string(),
            other => other.to_string(),
        };
        let mut res = HandlerResponse::json(status, json!({ "error": message, "status": status }));
        match self {
            Rejection::Unauthorized(_) => {
                res.set_header("www-authenticate", "Bearer".to_string());
            }
            Rejection::MethodNotAllowed { allowed, .. } => {
                res.set_header("allow", join_methods(&allowed));
            }
            Rejection::RateLimitExceeded { limit, retry_after } => {
                let secs = retry_after
                    .as_secs()
                    .saturating_add(u64::from(retry_after.subsec_nanos() > 0));
                res.set_header("retry-after", secs.max(1).to_string());
                res.set_header("x-ratelimit-limit", limit.to_string());
                res.set_header("x-ratelimit-remaining", "0".to_string());
            }
            Rejection::OriginNotAllowed { .. } | Rejection::UnsupportedMediaType { .. } => {}
        }
        res
    }
}

/// Failures that leave [`Dispatcher::dispatch`](crate::dispatcher::Dispatcher::dispatch).
///
/// Anything a handler or middleware raises travels through `Internal` unchanged;
/// the dispatcher neither swallows nor logs it.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid HTTP method `{0}`")]
    InvalidMethod(String),
    #[error("no route for {method} {path}")]
    RouteNotFound { method: Method, path: String },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl DispatchError {
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            DispatchError::InvalidMethod(_) => 400,
            DispatchError::RouteNotFound { .. } => 404,
            DispatchError::Internal(_) => 500,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, DispatchError::RouteNotFound { .. })
    }

    /// Status-mapped JSON response for hosts exposing the dispatcher over HTTP.
    /// Internal failure details are not echoed to the client.
    #[must_use]
    pub fn to_response(&self) -> HandlerResponse {
        let status = self.status_code();
        let message = match self {
            DispatchError::RouteNotFound { .. } => "Not Found".to_string(),
            DispatchError::InvalidMethod(_) => self.to_string(),
            DispatchError::Internal(_) => "Internal Server Error".to_string(),
        };
        HandlerResponse::json(status, json!({ "error": message, "status": status }))
    }
}

pub(crate) fn join_methods(methods: &[Method]) -> String {
    methods
        .iter()
        .map(Method::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_statuses() {
        assert_eq!(Rejection::from(AuthError::MissingCredentials).status(), 401);
        assert_eq!(
            Rejection::UnsupportedMediaType { content_type: None }.status(),
            415
        );
        assert_eq!(
            Rejection::MethodNotAllowed {
                method: Method::TRACE,
                allowed: vec![Method::GET],
            }
            .status(),
            405
        );
    }

    #[test]
    fn unauthorized_body_hides_reason() {
        let res = Rejection::from(AuthError::InvalidToken("bad signature".into())).into_response();
        assert_eq!(res.status, 401);
        assert_eq!(res.body["error"], "unauthorized");
        assert_eq!(res.get_header("WWW-Authenticate"), Some("Bearer"));
    }

    #[test]
    fn rate_limit_rounds_retry_after_up() {
        let res = Rejection::RateLimitExceeded {
            limit: 10,
            retry_after: Duration::from_millis(1500),
        }
        .into_response();
        assert_eq!(res.status, 429);
        assert_eq!(res.get_header("retry-after"), Some("2"));
        assert_eq!(res.get_header("x-ratelimit-limit"), Some("10"));
    }

    #[test]
    fn dispatch_error_mapping() {
        let nf = DispatchError::RouteNotFound {
            method: Method::GET,
            path: "/x".into(),
        };
        assert_eq!(nf.status_code(), 404);
        assert!(nf.is_not_found());
        let internal = DispatchError::from(anyhow::anyhow!("db down"));
        assert_eq!(internal.status_code(), 500);
        assert_eq!(internal.to_response().body["error"], "Internal Server Error");
    }
}

//! Per-dispatch request state and the response value handlers produce.
//!
//! A [`RequestContext`] is created by the dispatcher for exactly one call,
//! handed by `&mut` down the middleware chain and by `&` to the handler, and
//! dropped when the call returns. It is never shared between dispatches.

use std::collections::HashMap;
use std::sync::Arc;

use http::Method;
use serde::Serialize;
use serde_json::Value;
use smallvec::SmallVec;

use crate::ids::RequestId;

/// Maximum number of path/query parameters before heap allocation.
pub const MAX_INLINE_PARAMS: usize = 8;

/// Parameter storage: names come from the compiled route (shared `Arc<str>`),
/// values are per-request text.
pub type ParamVec = SmallVec<[(Arc<str>, String); MAX_INLINE_PARAMS]>;

/// Maximum inline headers before heap allocation.
pub const MAX_INLINE_HEADERS: usize = 16;

/// Header storage. Lookups are case-insensitive.
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;

/// Authenticated caller attached to the context by the auth middleware.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Principal {
    /// Stable subject identifier (`sub` claim, user id, token owner)
    pub subject: String,
    /// Granted scopes
    pub scopes: Vec<String>,
    /// Raw claims as produced by the validator (`Value::Null` when none)
    pub claims: Value,
}

impl Principal {
    #[must_use]
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            scopes: Vec::new(),
            claims: Value::Null,
        }
    }

    #[must_use]
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_claims(mut self, claims: Value) -> Self {
        self.claims = claims;
        self
    }

    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// Request data visible to middleware and handlers.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation id (`x-request-id` when supplied, otherwise freshly minted)
    pub request_id: RequestId,
    /// HTTP method
    pub method: Method,
    /// Path component of the request URI, query string removed
    pub path: String,
    /// Parameters captured by the matched route pattern (raw, not percent-decoded)
    pub params: ParamVec,
    /// Decoded query string parameters
    pub query_params: ParamVec,
    /// Request headers as extracted by the host
    pub headers: HeaderVec,
    /// Request body parsed as JSON, if the host supplied one
    pub body: Option<Value>,
    /// Peer address as reported by the host
    pub remote_addr: Option<String>,
    /// Principal attached by an authentication middleware
    pub identity: Option<Principal>,
}

impl RequestContext {
    /// Bare context for `method path`, mostly useful in tests and tools.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            request_id: RequestId::new(),
            method,
            path: path.into(),
            params: ParamVec::new(),
            query_params: ParamVec::new(),
            headers: HeaderVec::new(),
            body: None,
            remote_addr: None,
            identity: None,
        }
    }

    /// Path parameter captured by the route pattern.
    #[inline]
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    /// Query parameter; the last occurrence wins for repeated keys.
    #[inline]
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query_params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    /// Header value by name (case-insensitive per RFC 7230).
    #[inline]
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn identity(&self) -> Option<&Principal> {
        self.identity.as_ref()
    }

    pub fn set_identity(&mut self, principal: Principal) {
        self.identity = Some(principal);
    }

    /// Path parameters as an owned map.
    /// Note: This allocates - use `param()` in hot paths
    #[must_use]
    pub fn params_map(&self) -> HashMap<String, String> {
        self.params
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }
}

/// Response produced by a handler or by a short-circuiting middleware.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandlerResponse {
    /// HTTP status code (200, 404, 500, etc.)
    pub status: u16,
    /// Response headers
    #[serde(skip_serializing)]
    pub headers: HeaderVec,
    /// Response payload; opaque to the dispatcher
    pub body: Value,
}

impl HandlerResponse {
    #[must_use]
    pub fn new(status: u16, headers: HeaderVec, body: Value) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// JSON response with a `content-type` header.
    #[must_use]
    pub fn json(status: u16, body: Value) -> Self {
        let mut headers = HeaderVec::new();
        headers.push((Arc::from("content-type"), "application/json".to_string()));
        Self {
            status,
            headers,
            body,
        }
    }

    /// `200 OK` with a JSON body.
    #[must_use]
    pub fn ok(body: Value) -> Self {
        Self::json(200, body)
    }

    /// `204 No Content`.
    #[must_use]
    pub fn no_content() -> Self {
        Self::new(204, HeaderVec::new(), Value::Null)
    }

    #[must_use]
    pub fn error(status: u16, message: &str) -> Self {
        Self::json(status, serde_json::json!({ "error": message }))
    }

    #[inline]
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Add or replace a header (case-insensitive on the name).
    pub fn set_header(&mut self, name: &str, value: String) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((Arc::from(name), value));
    }

    /// Add a header only when the handler did not set one already.
    pub fn set_header_if_absent(&mut self, name: &str, value: String) {
        if self.get_header(name).is_none() {
            self.headers.push((Arc::from(name), value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut ctx = RequestContext::new(Method::GET, "/");
        ctx.headers
            .push((Arc::from("Authorization"), "Bearer abc".to_string()));
        assert_eq!(ctx.header("authorization"), Some("Bearer abc"));
        assert_eq!(ctx.header("AUTHORIZATION"), Some("Bearer abc"));
    }

    #[test]
    fn set_header_replaces_existing() {
        let mut res = HandlerResponse::ok(Value::Null);
        res.set_header("Content-Type", "text/plain".to_string());
        assert_eq!(res.get_header("content-type"), Some("text/plain"));
        assert_eq!(res.headers.len(), 1);
        res.set_header_if_absent("content-type", "application/json".to_string());
        assert_eq!(res.get_header("content-type"), Some("text/plain"));
    }

    #[test]
    fn last_query_value_wins() {
        let mut ctx = RequestContext::new(Method::GET, "/");
        ctx.query_params.push((Arc::from("limit"), "10".into()));
        ctx.query_params.push((Arc::from("limit"), "20".into()));
        assert_eq!(ctx.query_param("limit"), Some("20"));
    }
}

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use http::Method;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::context::{HandlerResponse, HeaderVec, ParamVec, RequestContext};
use crate::error::{join_methods, DispatchError, InvalidPatternError};
use crate::handler::{Handler, HandlerResult};
use crate::ids::RequestId;
use crate::middleware::{Middleware, MiddlewareChain};
use crate::router::{RouteMatch, RouteTable};

/// Everything a host knows about one inbound request.
///
/// [`Dispatcher::dispatch`] covers the common `(method, uri)` case; hosts that
/// also have headers, a parsed body or a peer address build one of these.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub method: String,
    /// Origin-form (`/path?query`) or absolute-form (`https://host/path?query`) URI
    pub uri: String,
    pub headers: HeaderVec,
    pub body: Option<Value>,
    pub remote_addr: Option<String>,
}

impl DispatchRequest {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            headers: HeaderVec::new(),
            body: None,
            remote_addr: None,
        }
    }

    #[must_use]
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((Arc::from(name), value.into()));
        self
    }

    #[must_use]
    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }
}

/// Terminal endpoint used for `OPTIONS` on a path that only has other methods.
struct AllowEndpoint {
    allow: String,
}

impl Handler for AllowEndpoint {
    fn call(&self, _ctx: &RequestContext) -> HandlerResult {
        let mut res = HandlerResponse::no_content();
        res.set_header("allow", self.allow.clone());
        Ok(res)
    }
}

/// Resolves requests against the route table and runs the middleware chain
/// around the matched handler.
///
/// Routes and middlewares are registered up front through `&mut self`; once
/// dispatching starts the dispatcher is only used through `&self` and can be
/// shared across threads (e.g. inside an `Arc`).
#[derive(Clone, Default)]
pub struct Dispatcher {
    routes: RouteTable,
    middlewares: MiddlewareChain,
}

impl Dispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `method` requests matching `pattern`.
    ///
    /// # Errors
    ///
    /// [`InvalidPatternError`] for a malformed pattern. Nothing is registered.
    pub fn route<H>(
        &mut self,
        method: Method,
        pattern: &str,
        handler: H,
    ) -> Result<&mut Self, InvalidPatternError>
    where
        H: Handler + 'static,
    {
        self.routes.register(method, pattern, handler)?;
        Ok(self)
    }

    /// Shorthand for [`route`](Self::route) with `GET`.
    ///
    /// # Errors
    ///
    /// [`InvalidPatternError`] for a malformed pattern.
    pub fn get<H: Handler + 'static>(
        &mut self,
        pattern: &str,
        handler: H,
    ) -> Result<&mut Self, InvalidPatternError> {
        self.route(Method::GET, pattern, handler)
    }

    /// # Errors
    ///
    /// [`InvalidPatternError`] for a malformed pattern.
    pub fn post<H: Handler + 'static>(
        &mut self,
        pattern: &str,
        handler: H,
    ) -> Result<&mut Self, InvalidPatternError> {
        self.route(Method::POST, pattern, handler)
    }

    /// # Errors
    ///
    /// [`InvalidPatternError`] for a malformed pattern.
    pub fn put<H: Handler + 'static>(
        &mut self,
        pattern: &str,
        handler: H,
    ) -> Result<&mut Self, InvalidPatternError> {
        self.route(Method::PUT, pattern, handler)
    }

    /// # Errors
    ///
    /// [`InvalidPatternError`] for a malformed pattern.
    pub fn patch<H: Handler + 'static>(
        &mut self,
        pattern: &str,
        handler: H,
    ) -> Result<&mut Self, InvalidPatternError> {
        self.route(Method::PATCH, pattern, handler)
    }

    /// # Errors
    ///
    /// [`InvalidPatternError`] for a malformed pattern.
    pub fn delete<H: Handler + 'static>(
        &mut self,
        pattern: &str,
        handler: H,
    ) -> Result<&mut Self, InvalidPatternError> {
        self.route(Method::DELETE, pattern, handler)
    }

    /// Append a middleware. The first one added is the outermost layer.
    pub fn add_middleware(&mut self, middleware: Arc<dyn Middleware>) -> &mut Self {
        debug!(
            middleware = middleware.name(),
            position = self.middlewares.len(),
            "Middleware added"
        );
        self.middlewares.push(middleware);
        self
    }

    #[must_use]
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    #[must_use]
    pub fn middlewares(&self) -> &MiddlewareChain {
        &self.middlewares
    }

    /// Dispatch `method uri` with no headers or body.
    ///
    /// The query string is ignored for matching. Without a matching route the
    /// result is [`DispatchError::RouteNotFound`]; otherwise it is whatever the
    /// composed chain returns, passed through unchanged.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::InvalidMethod`] for a method that is not an HTTP token
    /// - [`DispatchError::RouteNotFound`] when no route matches
    /// - any error raised by a middleware or the handler
    pub fn dispatch(&self, method: &str, uri: &str) -> HandlerResult {
        self.dispatch_request(DispatchRequest::new(method, uri))
    }

    /// Dispatch a fully described request.
    ///
    /// # Errors
    ///
    /// Same as [`dispatch`](Self::dispatch).
    pub fn dispatch_request(&self, req: DispatchRequest) -> HandlerResult {
        let start = Instant::now();
        let method = parse_method(&req.method)?;
        let (path, query) = split_uri(&req.uri);

        let auto_options;
        let (endpoint, params): (&dyn Handler, ParamVec) = match self.routes.resolve(&method, path) {
            Some(RouteMatch { route, params }) => (route.handler().as_ref(), params),
            None => {
                let allowed = if method == Method::OPTIONS {
                    self.routes.methods_for(path)
                } else {
                    Vec::new()
                };
                if allowed.is_empty() {
                    warn!(method = %method, path = %path, "Route not found");
                    return Err(DispatchError::RouteNotFound {
                        method,
                        path: path.to_string(),
                    });
                }
                let mut methods = allowed;
                methods.push(Method::OPTIONS);
                debug!(path = %path, allow = ?methods, "Answering OPTIONS from route table");
                auto_options = AllowEndpoint {
                    allow: join_methods(&methods),
                };
                (&auto_options as &dyn Handler, ParamVec::new())
            }
        };

        let request_id = RequestId::from_header_or_new(
            req.headers
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case("x-request-id"))
                .map(|(_, value)| value.as_str()),
        );
        let mut ctx = RequestContext {
            request_id,
            method,
            path: path.to_string(),
            params,
            query_params: parse_query(query),
            headers: req.headers,
            body: req.body,
            remote_addr: req.remote_addr,
            identity: None,
        };

        debug!(
            request_id = %ctx.request_id,
            method = %ctx.method,
            path = %ctx.path,
            middleware_count = self.middlewares.len(),
            "Executing middleware chain"
        );

        let composed = self.middlewares.compose(endpoint);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| composed.run(&mut ctx)));
        let elapsed_us = start.elapsed().as_micros() as u64;
        match outcome {
            Ok(result) => {
                debug!(
                    request_id = %ctx.request_id,
                    ok = result.is_ok(),
                    duration_us = elapsed_us,
                    "Dispatch complete"
                );
                result
            }
            Err(payload) => Err(DispatchError::Internal(anyhow!(
                "handler panicked on {} {} (request {}): {}",
                ctx.method,
                ctx.path,
                ctx.request_id,
                panic_message(payload.as_ref())
            ))),
        }
    }

    /// Dispatch and translate errors into status-mapped responses
    /// (`404`, `400`, `500`), for hosts that always need a response.
    #[must_use]
    pub fn respond(&self, req: DispatchRequest) -> HandlerResponse {
        match self.dispatch_request(req) {
            Ok(res) => res,
            Err(e) => {
                if matches!(e, DispatchError::Internal(_)) {
                    error!(error = %e, "Dispatch failed");
                }
                e.to_response()
            }
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("routes", &self.routes.len())
            .field("middlewares", &self.middlewares.names())
            .finish()
    }
}

fn parse_method(raw: &str) -> Result<Method, DispatchError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DispatchError::InvalidMethod(raw.to_string()));
    }
    Method::from_bytes(trimmed.to_ascii_uppercase().as_bytes())
        .map_err(|_| DispatchError::InvalidMethod(raw.to_string()))
}

/// Split a request URI into its path and raw query string.
///
/// The fragment is dropped, absolute-form URIs lose their scheme and
/// authority, and an empty path becomes `/`.
pub(crate) fn split_uri(uri: &str) -> (&str, Option<&str>) {
    let uri = uri.split_once('#').map_or(uri, |(before, _)| before);
    let (path, query) = match uri.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (uri, None),
    };
    let path = match path
        .strip_prefix("http://")
        .or_else(|| path.strip_prefix("https://"))
    {
        Some(rest) => rest.find('/').map_or("/", |i| &rest[i..]),
        None => path,
    };
    (if path.is_empty() { "/" } else { path }, query)
}

fn parse_query(query: Option<&str>) -> ParamVec {
    query
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .map(|(k, v)| (Arc::from(k.as_ref()), v.into_owned()))
                .collect()
        })
        .unwrap_or_default()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

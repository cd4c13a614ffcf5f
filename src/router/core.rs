//! Route table - hot path for request routing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use http::Method;
use tracing::{debug, info, warn};

use super::pattern::PathPattern;
use crate::context::ParamVec;
use crate::error::InvalidPatternError;
use crate::handler::Handler;

/// A `(method, pattern, handler)` registration. Immutable once registered.
#[derive(Clone)]
pub struct Route {
    method: Method,
    pattern: PathPattern,
    handler: Arc<dyn Handler>,
}

impl Route {
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    #[must_use]
    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.pattern.as_str())
            .finish_non_exhaustive()
    }
}

/// Result of successfully resolving a request to a route.
#[derive(Debug, Clone)]
pub struct RouteMatch<'a> {
    /// The matched registration
    pub route: &'a Route,
    /// Parameters captured from the path, in pattern order
    pub params: ParamVec,
}

impl RouteMatch<'_> {
    #[inline]
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Ordered set of routes, scanned in registration order.
///
/// Filled once at startup and read-only afterwards, so a shared reference can
/// be resolved from any number of threads without locking. When two patterns
/// could both match a request, the one registered first wins.
#[derive(Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `pattern` and append a route.
    ///
    /// # Errors
    ///
    /// [`InvalidPatternError`] when the pattern is malformed; the table is left unchanged.
    pub fn register<H>(
        &mut self,
        method: Method,
        pattern: &str,
        handler: H,
    ) -> Result<(), InvalidPatternError>
    where
        H: Handler + 'static,
    {
        self.register_arc(method, pattern, Arc::new(handler))
    }

    /// Same as [`register`](Self::register) for a handler that is already shared.
    ///
    /// # Errors
    ///
    /// [`InvalidPatternError`] when the pattern is malformed.
    pub fn register_arc(
        &mut self,
        method: Method,
        pattern: &str,
        handler: Arc<dyn Handler>,
    ) -> Result<(), InvalidPatternError> {
        let compiled = PathPattern::compile(pattern)?;

        if self
            .routes
            .iter()
            .any(|r| r.method == method && r.pattern.as_str() == pattern)
        {
            warn!(
                method = %method,
                pattern = %pattern,
                "Route registered twice; the earlier registration shadows this one"
            );
        }

        info!(
            method = %method,
            pattern = %pattern,
            params = ?compiled.param_names(),
            total_routes = self.routes.len() + 1,
            "Route registered"
        );

        self.routes.push(Route {
            method,
            pattern: compiled,
            handler,
        });
        Ok(())
    }

    /// Find the first route whose method equals `method` and whose pattern
    /// matches `path` end to end.
    ///
    /// A method mismatch is treated the same as no match at all.
    #[must_use]
    pub fn resolve(&self, method: &Method, path: &str) -> Option<RouteMatch<'_>> {
        debug!(method = %method, path = %path, "Route match attempt");
        let match_start = Instant::now();

        let found = self
            .routes
            .iter()
            .filter(|r| r.method == *method)
            .find_map(|route| route.pattern.matches(path).map(|params| RouteMatch { route, params }));

        let match_duration = match_start.elapsed();
        match &found {
            Some(m) if match_duration > Duration::from_millis(1) => warn!(
                method = %method,
                path = %path,
                route_pattern = %m.route.pattern.as_str(),
                duration_us = match_duration.as_micros(),
                "Slow route matching detected"
            ),
            Some(m) => debug!(
                method = %method,
                path = %path,
                route_pattern = %m.route.pattern.as_str(),
                path_params = ?m.params,
                duration_us = match_duration.as_micros(),
                "Route matched"
            ),
            None => debug!(
                method = %method,
                path = %path,
                duration_us = match_duration.as_micros(),
                "No route matched"
            ),
        }
        found
    }

    /// Methods that have at least one route matching `path`, in registration order.
    #[must_use]
    pub fn methods_for(&self, path: &str) -> Vec<Method> {
        let mut methods: Vec<Method> = Vec::new();
        for route in &self.routes {
            if !methods.contains(&route.method) && route.pattern.matches(path).is_some() {
                methods.push(route.method.clone());
            }
        }
        methods
    }

    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

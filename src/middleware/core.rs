use std::sync::Arc;

use crate::context::RequestContext;
use crate::handler::{Handler, HandlerResult};

/// A cross-cutting interceptor wrapped around route handlers.
///
/// `handle` receives the per-dispatch context and the remainder of the chain.
/// An implementation may
/// - call `next.run(ctx)` and return its result as is or transformed,
/// - return a response without calling `next` (short-circuit),
/// - mutate `ctx` (e.g. attach an identity) before calling `next`.
///
/// Instances are shared by every concurrent dispatch. State that changes
/// between requests must be synchronized by the middleware itself.
pub trait Middleware: Send + Sync {
    /// Short label for logs and the CLI route dump.
    fn name(&self) -> &'static str;

    fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> HandlerResult;
}

/// The rest of the chain as seen from one middleware.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    remaining: &'a [Arc<dyn Middleware>],
    endpoint: &'a dyn Handler,
}

impl<'a> Next<'a> {
    /// Invoke the next middleware, or the route handler when none are left.
    pub fn run(self, ctx: &mut RequestContext) -> HandlerResult {
        match self.remaining.split_first() {
            Some((current, rest)) => current.handle(
                ctx,
                Next {
                    remaining: rest,
                    endpoint: self.endpoint,
                },
            ),
            None => self.endpoint.call(ctx),
        }
    }

    /// Number of middlewares still ahead of the handler.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }
}

/// A middleware list folded around one terminal handler.
///
/// For `[A, B, C]` the call order is
/// `A-enter, B-enter, C-enter, handler, C-exit, B-exit, A-exit`.
#[derive(Clone, Copy)]
pub struct Composed<'a> {
    layers: &'a [Arc<dyn Middleware>],
    endpoint: &'a dyn Handler,
}

impl Composed<'_> {
    pub fn run(&self, ctx: &mut RequestContext) -> HandlerResult {
        Next {
            remaining: self.layers,
            endpoint: self.endpoint,
        }
        .run(ctx)
    }
}

/// Compose `middlewares` around `endpoint`, first element outermost.
#[must_use]
pub fn compose<'a>(middlewares: &'a [Arc<dyn Middleware>], endpoint: &'a dyn Handler) -> Composed<'a> {
    Composed {
        layers: middlewares,
        endpoint,
    }
}

/// Registration-ordered middleware list. Fixed once dispatching starts.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    layers: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware; it wraps every middleware added after it.
    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.layers.push(middleware);
    }

    #[must_use]
    pub fn with(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.push(middleware);
        self
    }

    #[must_use]
    pub fn compose<'a>(&'a self, endpoint: &'a dyn Handler) -> Composed<'a> {
        compose(&self.layers, endpoint)
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|m| m.name()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl FromIterator<Arc<dyn Middleware>> for MiddlewareChain {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Middleware>>>(iter: I) -> Self {
        Self {
            layers: iter.into_iter().collect(),
        }
    }
}

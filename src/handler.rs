use crate::context::{HandlerResponse, RequestContext};
use crate::error::DispatchError;

/// Outcome of running a handler or a composed middleware chain.
pub type HandlerResult = Result<HandlerResponse, DispatchError>;

/// Terminal request handler bound to a route.
///
/// Any `Fn(&RequestContext) -> HandlerResult` closure is a handler, so
/// registration usually reads `router.get("/users/{id}", |ctx| ...)`.
pub trait Handler: Send + Sync {
    fn call(&self, ctx: &RequestContext) -> HandlerResult;
}

impl<F> Handler for F
where
    F: Fn(&RequestContext) -> HandlerResult + Send + Sync,
{
    fn call(&self, ctx: &RequestContext) -> HandlerResult {
        self(ctx)
    }
}

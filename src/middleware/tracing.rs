use std::time::Instant;

use tracing::{debug, info, info_span, warn};

use super::{Middleware, Next};
use crate::context::RequestContext;
use crate::handler::HandlerResult;

/// Opens a `request` span around the rest of the chain and logs the outcome.
///
/// The request id is echoed back in `x-request-id` so callers can correlate
/// their logs with ours.
pub struct TracingMiddleware;

impl Middleware for TracingMiddleware {
    fn name(&self) -> &'static str {
        "tracing"
    }

    fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> HandlerResult {
        let span = info_span!(
            "request",
            request_id = %ctx.request_id,
            method = %ctx.method,
            path = %ctx.path,
        );
        let _guard = span.enter();
        let start = Instant::now();
        debug!("Request started");

        let result = next.run(ctx);
        let latency_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(mut res) => {
                res.set_header_if_absent("x-request-id", ctx.request_id.to_string());
                info!(status = res.status, latency_ms, "Request completed");
                Ok(res)
            }
            Err(e) => {
                warn!(status = e.status_code(), latency_ms, error = %e, "Request failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HandlerResponse;
    use crate::error::DispatchError;
    use crate::middleware::MiddlewareChain;
    use http::Method;
    use std::sync::Arc;

    #[test]
    fn echoes_request_id() {
        let chain = MiddlewareChain::new().with(Arc::new(TracingMiddleware));
        let handler = |_: &RequestContext| -> HandlerResult { Ok(HandlerResponse::no_content()) };
        let mut ctx = RequestContext::new(Method::GET, "/");
        let expected = ctx.request_id.to_string();
        let res = chain.compose(&handler).run(&mut ctx).unwrap();
        assert_eq!(res.get_header("x-request-id"), Some(expected.as_str()));
    }

    #[test]
    fn errors_pass_through() {
        let chain = MiddlewareChain::new().with(Arc::new(TracingMiddleware));
        let handler = |_: &RequestContext| -> HandlerResult { Err(anyhow::anyhow!("boom").into()) };
        let mut ctx = RequestContext::new(Method::GET, "/");
        let err = chain.compose(&handler).run(&mut ctx).unwrap_err();
        assert!(matches!(err, DispatchError::Internal(_)));
    }
}

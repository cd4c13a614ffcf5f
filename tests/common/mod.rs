#![allow(dead_code)]

pub mod tracing_util;

use std::sync::Arc;

use parking_lot::Mutex;
use sentryroute::middleware::{Middleware, Next};
use sentryroute::{HandlerResponse, HandlerResult, RequestContext};
use serde_json::json;

/// Shared execution log
pub type Trace = Arc<Mutex<Vec<String>>>;

pub fn new_trace() -> Trace {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(trace: &Trace) -> Vec<String> {
    trace.lock().clone()
}

/// Records `<label>-enter` / `<label>-exit` around any middleware.
pub struct Traced<M> {
    label: &'static str,
    inner: M,
    trace: Trace,
}

impl<M: Middleware> Traced<M> {
    pub fn new(label: &'static str, inner: M, trace: &Trace) -> Self {
        Self {
            label,
            inner,
            trace: Arc::clone(trace),
        }
    }
}

impl<M: Middleware> Middleware for Traced<M> {
    fn name(&self) -> &'static str {
        self.label
    }

    fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> HandlerResult {
        self.trace.lock().push(format!("{}-enter", self.label));
        let result = self.inner.handle(ctx, next);
        self.trace.lock().push(format!("{}-exit", self.label));
        result
    }
}

/// Middleware that only records and passes through.
pub struct PassThrough;

impl Middleware for PassThrough {
    fn name(&self) -> &'static str {
        "pass_through"
    }

    fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> HandlerResult {
        next.run(ctx)
    }
}

/// Handler that logs `handler` and echoes the route tag, params and identity.
pub fn recording_handler(
    tag: &'static str,
    trace: &Trace,
) -> impl Fn(&RequestContext) -> HandlerResult + Send + Sync + 'static {
    let trace = Arc::clone(trace);
    move |ctx: &RequestContext| -> HandlerResult {
        trace.lock().push("handler".to_string());
        Ok(echo(tag, ctx))
    }
}

/// Handler that echoes without recording.
pub fn echo_handler(tag: &'static str) -> impl Fn(&RequestContext) -> HandlerResult + Send + Sync + 'static {
    move |ctx: &RequestContext| -> HandlerResult { Ok(echo(tag, ctx)) }
}

fn echo(tag: &str, ctx: &RequestContext) -> HandlerResponse {
    HandlerResponse::ok(json!({
        "route": tag,
        "params": ctx.params_map(),
        "identity": ctx.identity().map(|p| p.subject.clone()),
    }))
}

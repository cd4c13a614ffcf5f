use std::collections::BTreeMap;

use serde_json::json;

use crate::context::{HandlerResponse, RequestContext};
use crate::dispatcher::Dispatcher;
use crate::error::InvalidPatternError;
use crate::handler::HandlerResult;

/// Echoes what the dispatcher resolved, tagged with the route name.
fn echo(name: &'static str) -> impl Fn(&RequestContext) -> HandlerResult + Send + Sync + 'static {
    move |ctx: &RequestContext| -> HandlerResult {
        let query: BTreeMap<&str, &str> = ctx
            .query_params
            .iter()
            .map(|(k, v)| (&**k, v.as_str()))
            .collect();
        Ok(HandlerResponse::ok(json!({
            "handler": name,
            "request_id": ctx.request_id.to_string(),
            "method": ctx.method.as_str(),
            "path": ctx.path,
            "params": ctx.params_map(),
            "query": query,
            "body": ctx.body,
            "identity": ctx.identity().map(|p| p.subject.as_str()),
        })))
    }
}

fn health(_ctx: &RequestContext) -> HandlerResult {
    Ok(HandlerResponse::ok(json!({ "status": "ok" })))
}

/// Dispatcher with the intrusion-dashboard routes and no middleware.
///
/// # Errors
///
/// Only if a built-in pattern were malformed.
pub fn demo_dispatcher() -> Result<Dispatcher, InvalidPatternError> {
    let mut d = Dispatcher::new();
    d.get("/api/health", health)?
        .get("/api/dashboard/stats", echo("dashboard_stats"))?
        .get("/api/intrusions", echo("list_intrusions"))?
        .post("/api/intrusions", echo("create_intrusion"))?
        .get("/api/intrusions/{id}", echo("get_intrusion"))?
        .put("/api/intrusions/{id}", echo("update_intrusion"))?
        .delete("/api/intrusions/{id}", echo("delete_intrusion"))?
        .get("/api/intrusions/{id}/risk", echo("intrusion_risk"))?;
    Ok(d)
}

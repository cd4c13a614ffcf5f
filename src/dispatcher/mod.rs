//! # Dispatcher Module
//!
//! Single entry point for request handling: resolve the route, build the
//! request context, run the middleware chain around the handler.
//!
//! ## Request Flow
//!
//! 1. The method is normalized and the URI split into path and query string
//! 2. The route table finds the first `(method, pattern)` matching the path
//! 3. A fresh [`RequestContext`](crate::context::RequestContext) is built with
//!    the captured parameters, decoded query parameters, headers and body
//! 4. The middleware chain runs around the handler, first-registered outermost
//! 5. The response (or error) is returned to the host unchanged
//!
//! ## Error Handling
//!
//! - No matching route: [`DispatchError::RouteNotFound`](crate::error::DispatchError::RouteNotFound), `404`
//! - Middleware rejections (`401`, `403`, `405`, `415`, `429`) arrive as ordinary responses
//! - Handler errors pass through untouched
//! - A panicking handler is contained and reported as `Internal` (`500`)
//!
//! `OPTIONS` on a path that has routes for other methods, but no `OPTIONS`
//! route of its own, is answered by a built-in `204` endpoint carrying an
//! `Allow` header. The middleware chain still runs around it, which is what
//! lets the CORS middleware answer preflights for plain `GET`/`POST` routes.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use sentryroute::context::HandlerResponse;
//! use sentryroute::dispatcher::Dispatcher;
//! use sentryroute::middleware::TracingMiddleware;
//! use sentryroute::RequestContext;
//!
//! let mut dispatcher = Dispatcher::new();
//! dispatcher
//!     .get("/api/intrusions/{id}", |ctx: &RequestContext| {
//!         Ok(HandlerResponse::ok(serde_json::json!({ "id": ctx.param("id") })))
//!     })
//!     .unwrap();
//! dispatcher.add_middleware(Arc::new(TracingMiddleware));
//!
//! let res = dispatcher.dispatch("GET", "/api/intrusions/42?verbose=1").unwrap();
//! assert_eq!(res.body["id"], "42");
//! assert!(dispatcher.dispatch("GET", "/nowhere").unwrap_err().is_not_found());
//! ```

mod core;

pub use self::core::{DispatchRequest, Dispatcher};

//! # sentryroute
//!
//! **sentryroute** is an HTTP request dispatcher: it maps an incoming
//! `(method, path)` pair to a registered handler, extracts path parameters and
//! runs an ordered chain of middleware (CORS, authentication, rate limiting,
//! input sanitization) around the handler.
//!
//! It does not speak HTTP on the wire. A host (a server, a test, the bundled
//! CLI) hands it a method, a URI and optional headers/body, and gets back a
//! [`HandlerResponse`] or a typed [`DispatchError`].
//!
//! ## Architecture
//!
//! - **[`router`]** - path pattern compilation and the ordered route table
//! - **[`middleware`]** - the middleware contract, onion composition and the built-ins
//! - **[`dispatcher`]** - registration surface and the dispatch state machine
//! - **[`security`]** - pluggable token validators (JWT, static tokens, remote verifier)
//! - **[`context`]** - per-request context, principal and response types
//! - **[`config`]** - YAML configuration of the middleware stack
//! - **[`logging`]** - `tracing-subscriber` setup
//! - **[`cli`]** - command-line front end over a demo route table
//!
//! ### Request Handling Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Host
//!     participant Dispatcher
//!     participant Table as RouteTable
//!     participant Cors as CorsMiddleware
//!     participant Auth as AuthMiddleware
//!     participant Handler
//!
//!     Host->>Dispatcher: dispatch("GET", "/api/intrusions/42?verbose=1")
//!     Dispatcher->>Dispatcher: Drop query string
//!     Dispatcher->>Table: resolve(GET, "/api/intrusions/42")
//!
//!     alt No Route Match
//!         Table-->>Dispatcher: None
//!         Dispatcher-->>Host: Err(RouteNotFound) (404)
//!     end
//!
//!     Table-->>Dispatcher: RouteMatch {id: "42"}
//!     Dispatcher->>Cors: handle(ctx, next)
//!
//!     alt OPTIONS preflight
//!         Cors-->>Host: 204 + Access-Control-* headers
//!     end
//!
//!     Cors->>Auth: next.run(ctx)
//!     Auth->>Auth: TokenValidator::validate(token)
//!
//!     alt Invalid Credentials
//!         Auth-->>Cors: 401 Unauthorized
//!     end
//!
//!     Auth->>Handler: next.run(ctx) with identity attached
//!     Handler-->>Auth: HandlerResponse
//!     Auth-->>Cors: HandlerResponse
//!     Cors-->>Dispatcher: HandlerResponse + CORS headers
//!     Dispatcher-->>Host: Ok(HandlerResponse)
//! ```
//!
//! ### Key Architectural Patterns
//!
//! 1. **First registration wins**: routes are scanned in registration order;
//!    a method mismatch counts as no match.
//! 2. **Onion composition**: the first middleware registered is the outermost,
//!    so it sees the request first and the response last.
//! 3. **Rejections are responses**: middleware refusals (401, 405, 415, 429)
//!    short-circuit with a response; only structural failures are errors.
//! 4. **Read-only after startup**: the route table and middleware list are
//!    shared across threads without locks; stateful middleware synchronizes
//!    internally.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use serde_json::json;
//! use sentryroute::middleware::{CorsMiddlewareBuilder, SanitizeMiddleware};
//! use sentryroute::{Dispatcher, HandlerResponse, HandlerResult, RequestContext};
//!
//! let mut dispatcher = Dispatcher::new();
//! dispatcher
//!     .get("/api/intrusions/{id}", |ctx: &RequestContext| -> HandlerResult {
//!         Ok(HandlerResponse::ok(json!({ "id": ctx.param("id") })))
//!     })
//!     .expect("valid pattern");
//!
//! let cors = CorsMiddlewareBuilder::new()
//!     .allowed_origins(&["https://soc.example.com"])
//!     .build()
//!     .expect("valid CORS configuration");
//! dispatcher
//!     .add_middleware(Arc::new(cors))
//!     .add_middleware(Arc::new(SanitizeMiddleware::new()));
//!
//! let res = dispatcher.dispatch("GET", "/api/intrusions/7").unwrap();
//! assert_eq!(res.body["id"], "7");
//!
//! let err = dispatcher.dispatch("DELETE", "/api/intrusions/7").unwrap_err();
//! assert_eq!(err.status_code(), 404);
//! ```
//!
//! ## HTTP status mapping
//!
//! | Outcome | Status |
//! |---|---|
//! | no matching route | 404 |
//! | missing or invalid credentials | 401 |
//! | disallowed CORS origin | 403 |
//! | method not allowed by the security policy | 405 |
//! | unsupported request content type | 415 |
//! | rate limit exceeded | 429 |
//! | handler panic or internal failure | 500 |

pub mod cli;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod ids;
pub mod logging;
pub mod middleware;
pub mod router;
pub mod security;

pub use context::{HandlerResponse, Principal, RequestContext};
pub use dispatcher::{DispatchRequest, Dispatcher};
pub use error::{AuthError, DispatchError, InvalidPatternError, PatternErrorKind, Rejection};
pub use handler::{Handler, HandlerResult};

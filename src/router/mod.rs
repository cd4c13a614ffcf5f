//! # Router Module
//!
//! Path matching and route resolution.
//!
//! ## Overview
//!
//! The router is responsible for:
//! - Compiling declarative path patterns (`/users/{id}`) into matchers
//! - Holding the ordered table of `(method, pattern, handler)` registrations
//! - Resolving an incoming `(method, path)` to the first matching route
//! - Extracting named path parameters from the matched path
//!
//! ## Architecture
//!
//! The router uses a two-phase approach:
//!
//! 1. **Compilation**: At registration, each pattern is validated and turned into a
//!    [`PathPattern`]: literal runs, named capture slots and an anchored regex.
//!    Malformed patterns fail here with [`InvalidPatternError`](crate::error::InvalidPatternError)
//!    so misconfiguration surfaces before any traffic is served.
//!
//! 2. **Matching**: For each request, [`RouteTable::resolve`] scans routes in
//!    registration order, skipping other methods, and returns the first match.
//!
//! ## Matching rules
//!
//! - A placeholder matches one or more characters, never `/`:
//!   `/users/{id}` matches `/users/42` but not `/users/42/posts` or `/users/`.
//! - The whole path must match; a trailing slash only matches if the pattern has one.
//! - Captured values are raw: percent-decoding is left to the handler.
//! - Ambiguity is settled by registration order.
//!
//! ## Example
//!
//! ```rust
//! use http::Method;
//! use sentryroute::context::HandlerResponse;
//! use sentryroute::router::RouteTable;
//!
//! let mut table = RouteTable::new();
//! table
//!     .register(Method::GET, "/users/{id}", |_ctx: &sentryroute::RequestContext| {
//!         Ok(HandlerResponse::no_content())
//!     })
//!     .unwrap();
//!
//! let m = table.resolve(&Method::GET, "/users/123").unwrap();
//! assert_eq!(m.param("id"), Some("123"));
//! assert!(table.resolve(&Method::GET, "/users/1/2").is_none());
//! ```

mod core;
mod pattern;

pub use self::core::{Route, RouteMatch, RouteTable};
pub use pattern::{PathPattern, PatternSegment};

//! # CLI Module
//!
//! Command-line front end for poking at a dispatcher without a network server.
//!
//! ## Commands
//!
//! ### `routes`
//!
//! Print the demo route table in registration order:
//!
//! ```bash
//! sentryroute routes
//! ```
//!
//! ### `dispatch`
//!
//! Run one request through the demo routes and the configured middleware stack
//! and print the response as JSON:
//!
//! ```bash
//! sentryroute dispatch -X GET --uri '/api/intrusions/42?verbose=1' \
//!     -H 'Authorization: Bearer ops-token' --config sentryroute.yaml
//! ```
//!
//! ### `check-config`
//!
//! Validate a configuration file and print the middleware stack it produces:
//!
//! ```bash
//! sentryroute check-config --config sentryroute.yaml
//! ```
//!
//! The demo routes model an intrusion-monitoring dashboard API and answer with
//! echo handlers, which is enough to observe routing, parameters and every
//! middleware decision.

mod commands;
mod demo;


pub use commands::{run, Cli, Commands};
pub use demo::demo_dispatcher;

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};

use super::demo::demo_dispatcher;
use crate::config::AppConfig;
use crate::dispatcher::{DispatchRequest, Dispatcher};

/// Command-line interface for sentryroute
#[derive(Debug, Parser)]
#[command(name = "sentryroute")]
#[command(version, about = "Route and dispatch requests through a configurable middleware stack", long_about = None)]
pub struct Cli {
    /// Debug-level logging (overrides SENTRYROUTE_LOG_LEVEL)
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List the demo route table in registration order
    Routes,
    /// Dispatch one request through the demo routes and print the response
    Dispatch {
        /// HTTP method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// Request target, with optional query string
        #[arg(short, long)]
        uri: String,

        /// Request header as `Name: value` (repeatable)
        #[arg(short = 'H', long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,

        /// JSON request body
        #[arg(short, long)]
        data: Option<String>,

        /// Client address seen by the rate limiter
        #[arg(long)]
        remote_addr: Option<String>,

        /// YAML middleware configuration (defaults apply when omitted)
        #[arg(short, long, env = "SENTRYROUTE_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Validate a configuration file and print the middleware stack it builds
    CheckConfig {
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected `Name: value`, got `{raw}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in `{raw}`"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let mut config = match path {
        Some(p) => AppConfig::from_path(p)?,
        None => AppConfig::default(),
    };
    config.apply_env_overrides()?;
    Ok(config)
}

fn configured_dispatcher(path: Option<&Path>) -> Result<Dispatcher> {
    let config = load_config(path)?;
    let mut dispatcher = demo_dispatcher()?;
    config.install(&mut dispatcher)?;
    Ok(dispatcher)
}

/// Execute `cli`, writing command output to `out`.
///
/// # Errors
///
/// Configuration, I/O and argument errors. A request that ends in a 4xx/5xx
/// response is still a successful `dispatch`.
pub fn run<W: Write>(cli: &Cli, out: &mut W) -> Result<()> {
    match &cli.command {
        Commands::Routes => {
            let dispatcher = demo_dispatcher()?;
            for route in dispatcher.routes().routes() {
                writeln!(out, "{:<8}{}", route.method().as_str(), route.pattern().as_str())?;
            }
        }
        Commands::Dispatch {
            method,
            uri,
            headers,
            data,
            remote_addr,
            config,
        } => {
            let dispatcher = configured_dispatcher(config.as_deref())?;
            let mut req = DispatchRequest::new(method.as_str(), uri.as_str());
            for (name, value) in headers {
                req = req.header(name, value.as_str());
            }
            if let Some(raw) = data {
                let body: Value =
                    serde_json::from_str(raw).context("--data must be a JSON document")?;
                req = req.body(body);
            }
            if let Some(addr) = remote_addr {
                req = req.remote_addr(addr.as_str());
            }

            let res = dispatcher.respond(req);
            let headers: Map<String, Value> = res
                .headers
                .iter()
                .map(|(k, v)| (k.to_string(), Value::String(v.clone())))
                .collect();
            let printed = json!({
                "status": res.status,
                "headers": headers,
                "body": res.body,
            });
            writeln!(out, "{}", serde_json::to_string_pretty(&printed)?)?;
        }
        Commands::CheckConfig { config } => {
            let loaded = load_config(Some(config.as_path()))?;
            let stack = loaded
                .build_middlewares()
                .with_context(|| format!("invalid configuration in {}", config.display()))?;
            writeln!(out, "{} is valid; middleware stack (outermost first):", config.display())?;
            for (i, mw) in stack.iter().enumerate() {
                writeln!(out, "  {}. {}", i + 1, mw.name())?;
            }
        }
    }
    Ok(())
}

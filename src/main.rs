use std::process::ExitCode;

use clap::Parser;
use sentryroute::cli::{run, Cli};
use sentryroute::logging::{init_logging, LogConfig};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env();
    if cli.verbose {
        log_config.log_level = "debug".to_string();
    }
    if let Err(e) = init_logging(&log_config) {
        eprintln!("Warning: {e:#}");
    }

    match run(&cli, &mut std::io::stdout().lock()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Command failed");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

//! Logging setup
//!
//! Logs go to stderr so stdout stays clean for JSON output.
//!
//! Filter priority: `MARKLOC_LOG`, then `RUST_LOG`, then `warn`.

use std::env;
use std::io::IsTerminal;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "warn";

fn filter_directive() -> String {
    env::var("MARKLOC_LOG")
        .or_else(|_| env::var("RUST_LOG"))
        .unwrap_or_else(|_| DEFAULT_FILTER.to_string())
}

/// Installs the global subscriber. Does nothing if one is already set.
pub fn init(verbose: bool) {
    let directive = if verbose {
        "markloc=debug".to_string()
    } else {
        filter_directive()
    };
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .try_init();
}

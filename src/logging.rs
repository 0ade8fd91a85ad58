//! Tracing subscriber setup for the command-line tool.
//!
//! Library code only emits events; installing a subscriber is the
//! binary's decision. `RUST_LOG` wins over the `-v` count when set.

use std::io::IsTerminal;

use tracing_subscriber::EnvFilter;

/// Default filter for a given number of `-v` flags.
pub fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber, writing to stderr. A second call is a no-op.
pub fn init(verbosity: u8) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_for(verbosity)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .try_init();
}

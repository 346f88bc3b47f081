//! Log setup for the binary.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Environment variable checked before `RUST_LOG`.
pub const LOG_ENV: &str = "LONGFORM_LOG";

/// Default filter directive for a `-v` count.
pub fn level_for(verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Filter from `LONGFORM_LOG`, then `RUST_LOG`, then the `-v` level.
pub fn build_filter(verbose: u8, quiet: bool) -> EnvFilter {
    let from_env = [LOG_ENV, "RUST_LOG"].into_iter().find_map(|var| {
        std::env::var(var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .and_then(|v| EnvFilter::try_new(v).ok())
    });
    from_env.unwrap_or_else(|| EnvFilter::new(level_for(verbose, quiet)))
}

/// Install the global subscriber, writing to stderr.
///
/// Does nothing if a subscriber is already installed.
pub fn init(verbose: u8, quiet: bool) {
    let installed = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose >= 2),
        )
        .with(build_filter(verbose, quiet))
        .try_init();
    if installed.is_err() {
        tracing::debug!("Log subscriber already installed");
    }
}

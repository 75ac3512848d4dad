//! Tracing subscriber setup for the CLI.

use tracing_subscriber::EnvFilter;

/// Map `-q` / `-v` flags to a default filter directive.
pub fn default_directive(verbosity: u8, quiet: bool) -> &'static str {
    if quiet {
        return "fieldscribe=warn";
    }
    match verbosity {
        0 => "fieldscribe=info",
        1 => "fieldscribe=debug",
        _ => "fieldscribe=trace,info",
    }
}

/// Install the global fmt subscriber. `RUST_LOG` takes precedence over flags.
///
/// Calling this twice is harmless; the second install is ignored.
pub fn init(verbosity: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity, quiet)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbosity >= 2)
        .with_writer(std::io::stderr)
        .try_init();
}

//! Tracing subscriber setup for the binary.
//!
//! Directives come from `LAYERTRACE_LOG`, then `RUST_LOG`, then the `-v`
//! count (0 = warn, 1 = info, 2 = debug, 3+ = trace). Logs go to stderr so
//! they never mix with results printed on stdout.

use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "LAYERTRACE_LOG";

pub fn level_for_verbosity(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn env_filter(verbosity: u8) -> EnvFilter {
    [LOG_ENV, "RUST_LOG"]
        .iter()
        .find_map(|var| {
            let directives = std::env::var(var).ok()?;
            match EnvFilter::try_new(&directives) {
                Ok(filter) => Some(filter),
                Err(e) => {
                    eprintln!("Warning: ignoring invalid {var}={directives:?}: {e}");
                    None
                }
            }
        })
        .unwrap_or_else(|| {
            EnvFilter::default()
                .add_directive(LevelFilter::from_level(level_for_verbosity(verbosity)).into())
        })
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init(verbosity: u8) {
    let _ = tracing_subscriber::registry()
        .with(env_filter(verbosity))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}

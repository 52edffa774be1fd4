//! Logging flags and the tracing subscriber.

use crate::{CliError, CliResult};
use clap::{ArgAction, Args};
use tracing_subscriber::{EnvFilter, filter::LevelFilter};

/// Logging arguments.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct LogArgs {
    /// Verbosity: `-v` info, `-vv` debug, `-vvv` trace. `RUST_LOG` takes precedence.
    #[arg(short = 'v', long = "verbosity", action = ArgAction::Count, global = true)]
    pub verbosity: u8,
}

impl LogArgs {
    /// Installs the global subscriber at the requested verbosity.
    pub fn init_tracing_subscriber(&self) -> CliResult<()> {
        init_tracing_subscriber(self.verbosity, None)
    }
}

/// Maps a `-v` count to a level.
pub const fn verbosity_level(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Installs a global `fmt` subscriber.
///
/// `RUST_LOG` wins over `filter`, which wins over `verbosity`.
pub fn init_tracing_subscriber(verbosity: u8, filter: Option<EnvFilter>) -> CliResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        filter.unwrap_or_else(|| {
            EnvFilter::builder()
                .with_default_directive(verbosity_level(verbosity).into())
                .parse_lossy("")
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| CliError::Tracing(err.to_string()))
}

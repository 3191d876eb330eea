//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the filter:
//! 1. `--log-level` flag / `RUNNER_LOG`
//! 2. `RUST_LOG`
//! 3. `info`
//!
//! Job output shows up under the `bot` (embedded) and `remote_job`
//! (subprocess) targets.

use crate::config::LogLevel;
use anyhow::anyhow;
use tracing_subscriber::EnvFilter;

pub fn init_logging(level: Option<LogLevel>) -> anyhow::Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::new(directive(level)),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow!(err))
}

fn directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}

// src/logging.rs

//! Tracing subscriber for `cpc-server`.
//!
//! `--log-level` sets the level for the `copernicus` target only; other
//! crates stay at `warn`. Without the flag, `CPC_LOG` is read as a full
//! filter directive (e.g. `copernicus::heartbeat=debug,info`). Output goes
//! to stderr.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use crate::cli::LogLevel;

const ENV_VAR: &str = "CPC_LOG";
const DEFAULT_DIRECTIVE: &str = "copernicus=info,warn";

pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = match cli_level {
        Some(lvl) => EnvFilter::try_new(directive_for(lvl))?,
        None => match std::env::var(ENV_VAR) {
            Ok(spec) if !spec.trim().is_empty() => EnvFilter::try_new(spec.trim())
                .with_context(|| format!("invalid {ENV_VAR} filter"))?,
            _ => EnvFilter::new(DEFAULT_DIRECTIVE),
        },
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("logging already initialised: {e}"))?;

    Ok(())
}

fn directive_for(lvl: LogLevel) -> String {
    let level = match lvl {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    };
    format!("copernicus={level},warn")
}

// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `cpc-server`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "cpc-server",
    version,
    about = "Copernicus workflow server: drives dataflow projects and dispatches commands to workers.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the server config file (TOML).
    ///
    /// A missing file at the default location means "all defaults".
    #[arg(long, value_name = "PATH", default_value = "cpc-server.toml")]
    pub config: String,

    /// Override `[server].projects_dir`.
    #[arg(long, value_name = "DIR")]
    pub projects_dir: Option<String>,

    /// Override `[server].exec_threads` (0 = number of CPUs).
    #[arg(long, value_name = "N")]
    pub exec_threads: Option<usize>,

    /// Log level for the server's own targets (error, warn, info, debug, trace).
    ///
    /// If omitted, `CPC_LOG` is read as a filter directive.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Load config and projects, print a summary, but don't start any threads.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

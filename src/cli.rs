// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `plandag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "plandag",
    version,
    about = "Execute a dependency-aware task plan with bounded parallelism and retries.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the plan file (JSON, or TOML by `.toml` extension).
    #[arg(long, value_name = "PATH", default_value = "plan.json")]
    pub plan: PathBuf,

    /// Maximum number of tasks running at once.
    ///
    /// Overrides `scheduler.max_parallel` from the plan file.
    #[arg(long, value_name = "N")]
    pub max_parallel: Option<usize>,

    /// Write the execution report as JSON to this path.
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// Parse + validate, print the plan and its levels, but don't execute.
    #[arg(long)]
    pub dry_run: bool,

    /// Keep dependencies on unknown task ids instead of rejecting the plan.
    ///
    /// Such tasks can never run; the run ends with a deadlock.
    #[arg(long)]
    pub allow_dangling: bool,

    /// Backoff time unit in milliseconds.
    ///
    /// Overrides `scheduler.retry_unit_ms` from the plan file.
    #[arg(long, value_name = "MS")]
    pub retry_unit_ms: Option<u64>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `PLANDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
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

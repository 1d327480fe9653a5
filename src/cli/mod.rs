//! Command-line interface definitions for the `homelab` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Parser, Subcommand, ValueEnum};

/// Top-level CLI for the `homelab` binary.
#[derive(Debug, Parser)]
#[command(
    name = "homelab",
    about = "Describe home-lab gateway instances as a deployment plan",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Log output format written to stderr.
    #[arg(long, value_enum, default_value_t = LogFormatArg::Human, global = true)]
    pub(crate) log_format: LogFormatArg,
    /// Subcommand to run.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Subcommands of `homelab`.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Print the resource plan and instance outputs as JSON.
    #[command(name = "plan", about = "Print the resource plan and outputs as JSON")]
    Plan(SpecArgs),
    /// Print the rendered cloud-config bootstrap document.
    #[command(name = "user-data", about = "Print the rendered cloud-config document")]
    UserData(SpecArgs),
}

/// Arguments shared by subcommands reading an instance spec file.
#[derive(Debug, Parser)]
pub(crate) struct SpecArgs {
    /// Instance spec file (TOML).
    #[arg(value_name = "SPEC")]
    pub(crate) spec: String,
    /// Override the draw state file from configuration.
    ///
    /// Random hostnames and address suffixes are memoized in this file so
    /// repeated runs describe the same resources.
    #[arg(long, value_name = "PATH")]
    pub(crate) state_file: Option<String>,
    /// Place override list entries before base entries when merging
    /// cloud-config documents.
    #[arg(long)]
    pub(crate) override_first: bool,
}

/// Log format accepted on the command line.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum LogFormatArg {
    /// Compact human-readable lines.
    Human,
    /// One JSON object per event.
    Json,
}

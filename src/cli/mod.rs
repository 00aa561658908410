//! Command-line interface definitions for the `avh-harness` binary.
//!
//! This module centralises the clap parser structures so both the main
//! binary and the build script can reuse them when generating the manual
//! page.

use clap::Parser;

/// Top-level CLI for the `avh-harness` binary.
#[derive(Debug, Parser)]
#[command(
    name = "avh-harness",
    about = "Run firmware on an Arm Virtual Hardware instance and tear it down",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Provision an instance, execute a firmware image, and delete it.
    #[command(
        name = "run",
        about = "Provision an instance, run a firmware image, and delete it"
    )]
    Run(RunCommand),
}

/// Arguments for the `avh-harness run` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct RunCommand {
    /// Firmware image to execute on the instance.
    #[arg(long, value_name = "PATH")]
    pub(crate) firmware: String,
    /// Simulator configuration file delivered alongside the firmware.
    #[arg(long = "fvp-config", value_name = "PATH")]
    pub(crate) fvp_config: String,
    /// Text the run output must contain for the run to count as passed.
    #[arg(long, value_name = "TEXT")]
    pub(crate) expect: Option<String>,
}

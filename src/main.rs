//! Binary entry point for the avh-harness CLI.

use std::io::{self, Write};
use std::process;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use avh_harness::{AvhClient, Harness, HarnessConfig, HarnessError, RunRequest};

mod cli;

use cli::{Cli, RunCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("login failed: {0}")]
    Login(String),
    #[error("run did not report an exit status")]
    MissingExitCode,
    #[error(transparent)]
    Run(#[from] HarnessError),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Run(command) => run_command(command).await,
    }
}

async fn run_command(args: RunCommand) -> Result<i32, CliError> {
    let config =
        HarnessConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    let client = AvhClient::login(&config.endpoint, &config.api_token)
        .await
        .map_err(|err| CliError::Login(err.to_string()))?;
    let harness =
        Harness::new(&client, config).map_err(|err| CliError::Config(err.to_string()))?;

    let request = to_request(args);
    let outcome = harness.execute(&request).await?;

    let mut stdout = io::stdout();
    write!(stdout, "{}", outcome.result.output).ok();
    if !outcome.result.output.ends_with('\n') {
        writeln!(stdout).ok();
    }

    outcome.result.exit_code.ok_or(CliError::MissingExitCode)
}

fn to_request(args: RunCommand) -> RunRequest {
    RunRequest {
        firmware: Utf8PathBuf::from(args.firmware),
        fvp_config: Utf8PathBuf::from(args.fvp_config),
        expect: args.expect,
    }
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

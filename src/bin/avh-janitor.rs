//! Leaked-instance janitor for the AVH test harness.
//!
//! This binary deletes any instance in the default project whose name
//! carries the `avh-harness-` prefix, waits for the control plane to forget
//! each one, and exits non-zero if anything remains.

use std::io::Write as _;
use std::process;

use avh_harness::{AvhClient, HarnessConfig, Janitor};

#[tokio::main]
async fn main() {
    let exit_code = match run().await {
        Ok(()) => 0,
        Err(message) => {
            writeln!(std::io::stderr(), "{message}").ok();
            1
        }
    };
    process::exit(exit_code);
}

async fn run() -> Result<(), String> {
    let config = HarnessConfig::load_without_cli_args().map_err(|err| err.to_string())?;
    config.validate().map_err(|err| err.to_string())?;
    let client = AvhClient::login(&config.endpoint, &config.api_token)
        .await
        .map_err(|err| err.to_string())?;

    let timings = config.timings();
    let janitor = Janitor::new(&client, timings.poll_interval, timings.delete_timeout);
    let summary = janitor.sweep().await.map_err(|err| err.to_string())?;

    writeln!(
        std::io::stdout(),
        "janitor sweep complete: deleted={}, skipped={}",
        summary.deleted,
        summary.skipped
    )
    .map_err(|err| err.to_string())?;
    Ok(())
}

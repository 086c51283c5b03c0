//! ktf CLI
//!
//! Waits for test namespaces to become ready and tears down what tests left
//! behind.

use clap::Parser;

use ktf_cli::{Cli, Result};
use ktf_common::telemetry::{init_logging, LoggingConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(LoggingConfig {
        json: cli.log_json,
        with_target: false,
        ..Default::default()
    })?;

    cli.run().await
}

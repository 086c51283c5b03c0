//! ktf CLI library

pub mod commands;
pub mod error;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};

/// ktf - Kubernetes test-environment orchestration
#[derive(Parser, Debug)]
#[command(name = "ktf")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "KTF_LOG_JSON")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Wait until every workload in the given namespaces is ready
    Ready(commands::ready::ReadyArgs),
    /// Delete manifests and namespaces left behind by tests
    Teardown(commands::teardown::TeardownArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Ready(args) => commands::ready::run(args).await,
            Commands::Teardown(args) => commands::teardown::run(args).await,
        }
    }
}

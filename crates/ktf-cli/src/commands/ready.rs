//! Ready command - block until namespaces' workloads are available

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use tracing::info;

use ktf_cluster::readiness::wait_for_namespace_ready;
use ktf_cluster::Cluster;

use crate::Result;

/// Ready command arguments
#[derive(Args, Debug)]
pub struct ReadyArgs {
    /// Namespace to wait for (repeatable)
    #[arg(long, short = 'n', required = true)]
    pub namespace: Vec<String>,

    /// Path to kubeconfig (defaults to the inferred config)
    #[arg(long, env = "KTF_KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Give up after this many seconds (waits indefinitely when unset)
    #[arg(long, env = "KTF_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Seconds between readiness checks
    #[arg(long, default_value = "1")]
    pub interval: u64,
}

/// Run the ready command
pub async fn run(args: ReadyArgs) -> Result<()> {
    let cluster = super::attach(args.kubeconfig.as_deref()).await?;
    let ctx = super::command_context(args.timeout);
    let cp = cluster.control_plane();
    let interval = Duration::from_secs(args.interval);

    for namespace in &args.namespace {
        wait_for_namespace_ready(&ctx, cp.as_ref(), namespace, interval).await?;
        info!(namespace = %namespace, "namespace ready");
    }
    Ok(())
}

//! CLI command implementations

pub mod ready;
pub mod teardown;

use std::path::Path;
use std::time::Duration;

use ktf_cluster::ExistingCluster;
use ktf_common::Context;
use tracing::warn;

use crate::Result;

/// Attach to the cluster named by `kubeconfig`, or the inferred default
pub(crate) async fn attach(kubeconfig: Option<&Path>) -> Result<ExistingCluster> {
    let builder = ExistingCluster::builder();
    let builder = match kubeconfig {
        Some(path) => builder.with_kubeconfig(path),
        None => builder.infer(),
    };
    Ok(builder.build().await?)
}

/// Root context for a command: bounded by `timeout_secs` when given and
/// cancelled on Ctrl-C
pub(crate) fn command_context(timeout_secs: Option<u64>) -> Context {
    let ctx = match timeout_secs {
        Some(secs) => Context::background().with_timeout(Duration::from_secs(secs)),
        None => Context::background(),
    };

    let on_interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            on_interrupt.cancel();
        }
    });
    ctx
}

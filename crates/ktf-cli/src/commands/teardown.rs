//! Teardown command - delete manifests and namespaces left by tests

use std::path::PathBuf;

use clap::Args;
use tracing::info;

use ktf_cluster::cleaner::DEFAULT_NAMESPACE_CONCURRENCY;
use ktf_cluster::Cleaner;

use crate::{Error, Result};

/// Teardown command arguments
#[derive(Args, Debug)]
pub struct TeardownArgs {
    /// Namespace to delete (repeatable)
    #[arg(long, short = 'n')]
    pub namespace: Vec<String>,

    /// Manifest file whose objects should be deleted (repeatable)
    #[arg(long, short = 'f')]
    pub manifest: Vec<PathBuf>,

    /// Path to kubeconfig (defaults to the inferred config)
    #[arg(long, env = "KTF_KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Namespace deletions allowed in flight at once
    #[arg(long, default_value_t = DEFAULT_NAMESPACE_CONCURRENCY)]
    pub concurrency: usize,

    /// Give up after this many seconds (waits indefinitely when unset)
    #[arg(long, env = "KTF_TIMEOUT")]
    pub timeout: Option<u64>,
}

/// Read every manifest up front so a bad path fails before anything is deleted
fn read_manifests(paths: &[PathBuf]) -> Result<Vec<String>> {
    paths
        .iter()
        .map(|path| std::fs::read_to_string(path).map_err(|e| Error::read(path, e)))
        .collect()
}

/// Run the teardown command
pub async fn run(args: TeardownArgs) -> Result<()> {
    if args.namespace.is_empty() && args.manifest.is_empty() {
        return Err(Error::validation(
            "nothing to tear down: pass --namespace and/or --manifest",
        ));
    }
    let manifests = read_manifests(&args.manifest)?;

    let cluster = super::attach(args.kubeconfig.as_deref()).await?;
    let ctx = super::command_context(args.timeout);

    let cleaner = Cleaner::new(&cluster).with_concurrency(args.concurrency);
    for manifest in manifests {
        cleaner.add_manifest(manifest);
    }
    for namespace in &args.namespace {
        cleaner.add_namespace(namespace.clone());
    }

    cleaner.cleanup(&ctx).await?;
    info!(
        namespaces = args.namespace.len(),
        manifests = args.manifest.len(),
        "teardown complete"
    );
    Ok(())
}

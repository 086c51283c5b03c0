//! The `Addon` abstraction and readiness records

use std::collections::BTreeMap;

use async_trait::async_trait;
use ktf_common::{Context, Result};

use crate::cluster::Cluster;
use crate::control_plane::ObjectRef;

/// Diagnostic artifacts keyed by file name
pub type Diagnostics = BTreeMap<String, Vec<u8>>;

/// Snapshot of what still blocks an addon (or namespace, or job) from being ready.
///
/// Recomputed from a fresh control-plane snapshot on every poll tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Readiness {
    /// Objects that have not converged yet
    pub blocking: Vec<ObjectRef>,
    ready: bool,
}

impl Readiness {
    /// Converged: nothing blocks
    pub fn ready() -> Self {
        Self {
            blocking: Vec::new(),
            ready: true,
        }
    }

    /// Not converged; `blocking` lists what is outstanding
    pub fn waiting_on(blocking: Vec<ObjectRef>) -> Self {
        Self {
            ready: blocking.is_empty(),
            blocking,
        }
    }

    /// Not converged because of a single object
    pub fn blocked_by(object: ObjectRef) -> Self {
        Self::waiting_on(vec![object])
    }

    /// Whether everything converged
    pub fn is_ready(&self) -> bool {
        self.ready && self.blocking.is_empty()
    }

    /// Combine two records; the result is ready only if both are
    pub fn merge(mut self, other: Readiness) -> Self {
        self.ready = self.ready && other.ready;
        self.blocking.extend(other.blocking);
        self
    }
}

/// An installable component on a cluster.
///
/// Configuration is fixed when the addon is built; the runtime value is
/// immutable and shared as `Arc<dyn Addon>`. Implementations must honor
/// `ctx` in every method that blocks.
#[async_trait]
pub trait Addon: Send + Sync {
    /// Unique addon name
    fn name(&self) -> &str;

    /// Names of addons that must be ready before this one deploys
    async fn dependencies(&self, ctx: &Context, cluster: &dyn Cluster) -> Result<Vec<String>>;

    /// Install onto the cluster
    async fn deploy(&self, ctx: &Context, cluster: &dyn Cluster) -> Result<()>;

    /// Uninstall from the cluster
    async fn delete(&self, ctx: &Context, cluster: &dyn Cluster) -> Result<()>;

    /// Current readiness snapshot
    async fn ready(&self, ctx: &Context, cluster: &dyn Cluster) -> Result<Readiness>;

    /// Collect diagnostic artifacts for a failed run
    async fn dump_diagnostics(&self, ctx: &Context, cluster: &dyn Cluster) -> Result<Diagnostics>;
}

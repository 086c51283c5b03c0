//! Per-cluster addon registry and the deploy/delete protocol

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info, instrument, warn};

use ktf_common::{Context, Error, Result};

use crate::addon::Addon;
use crate::cluster::Cluster;
use crate::dependencies::{teardown_order, wait_for_dependencies};

/// Poll interval for dependency readiness waits
pub const DEFAULT_DEPENDENCY_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Name-keyed set of live addons on one cluster.
///
/// The lock is taken only around map reads and mutations and is never held
/// across an `.await`.
pub struct AddonRegistry {
    addons: RwLock<HashMap<String, Arc<dyn Addon>>>,
    poll_interval: Duration,
}

impl Default for AddonRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AddonRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            addons: RwLock::new(HashMap::new()),
            poll_interval: DEFAULT_DEPENDENCY_POLL_INTERVAL,
        }
    }

    /// Poll dependencies at `interval` instead of the default
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Poll interval used for dependency waits
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Registered addon by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Addon>> {
        self.addons.read().get(name).cloned()
    }

    /// All registered addons, ordered by name
    pub fn list(&self) -> Vec<Arc<dyn Addon>> {
        let mut addons: Vec<_> = self.addons.read().values().cloned().collect();
        addons.sort_by(|a, b| a.name().cmp(b.name()));
        addons
    }

    /// Registered addon names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.addons.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Insert without deploying; fails if the name is taken
    pub fn register(&self, cluster: &str, addon: Arc<dyn Addon>) -> Result<()> {
        let mut addons = self.addons.write();
        if addons.contains_key(addon.name()) {
            return Err(Error::AlreadyRegistered {
                addon: addon.name().to_string(),
                cluster: cluster.to_string(),
            });
        }
        addons.insert(addon.name().to_string(), addon);
        Ok(())
    }

    /// Remove by name, returning the addon if it was present
    pub fn deregister(&self, name: &str) -> Option<Arc<dyn Addon>> {
        self.addons.write().remove(name)
    }

    /// Register `addon`, wait for its dependencies, then deploy it.
    ///
    /// The name is reserved up front so a concurrent deploy of the same name
    /// fails with [`Error::AlreadyRegistered`]. The reservation is released
    /// on any failure, and also when the returned future is dropped before
    /// the deploy completes.
    #[instrument(skip_all, fields(cluster = %cluster.name(), addon = %addon.name()))]
    pub async fn deploy(
        &self,
        ctx: &Context,
        cluster: &dyn Cluster,
        addon: Arc<dyn Addon>,
    ) -> Result<()> {
        self.register(cluster.name(), addon.clone())?;
        let reservation = Reservation {
            registry: self,
            name: addon.name(),
            armed: true,
        };

        let result = async {
            wait_for_dependencies(ctx, cluster, addon.as_ref(), self.poll_interval).await?;
            addon.deploy(ctx, cluster).await
        }
        .await;

        match &result {
            Ok(()) => {
                reservation.keep();
                info!("addon deployed");
            }
            Err(e) => warn!(error = %e, "addon deploy failed, deregistering"),
        }
        result
    }

    /// Delete a registered addon, deregistering it once deletion succeeds.
    ///
    /// Unknown names are a no-op.
    #[instrument(skip(self, ctx, cluster), fields(cluster = %cluster.name()))]
    pub async fn delete(&self, ctx: &Context, cluster: &dyn Cluster, name: &str) -> Result<()> {
        let Some(addon) = self.get(name) else {
            debug!("addon not registered, nothing to delete");
            return Ok(());
        };

        addon.delete(ctx, cluster).await?;
        self.deregister(name);
        info!("addon deleted");
        Ok(())
    }

    /// Delete every registered addon, dependents before their dependencies.
    ///
    /// Every addon is attempted; the first error is returned.
    pub async fn delete_all(&self, ctx: &Context, cluster: &dyn Cluster) -> Result<()> {
        let order = teardown_order(ctx, cluster, &self.list()).await?;
        let mut first_error = None;
        for name in order {
            if let Err(e) = self.delete(ctx, cluster, &name).await {
                warn!(addon = %name, error = %e, "failed to delete addon");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// A registry entry that is removed again unless the deploy completes
struct Reservation<'a> {
    registry: &'a AddonRegistry,
    name: &'a str,
    armed: bool,
}

impl Reservation<'_> {
    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!(addon = %self.name, "releasing addon registration");
            self.registry.deregister(self.name);
        }
    }
}

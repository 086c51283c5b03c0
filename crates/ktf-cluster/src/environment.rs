//! A cluster plus the addons a test suite needs on it

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use ktf_common::{Context, Error, Result};

use crate::addon::{Addon, Diagnostics, Readiness};
use crate::cluster::Cluster;
use crate::readiness::poll_until_ready;

/// Poll interval for [`Environment::wait_for_ready`]
pub const DEFAULT_ENVIRONMENT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Builder for [`Environment`]
#[derive(Default)]
pub struct EnvironmentBuilder {
    name: Option<String>,
    cluster: Option<Arc<dyn Cluster>>,
    addons: Vec<Arc<dyn Addon>>,
    poll_interval: Option<Duration>,
}

impl EnvironmentBuilder {
    /// Empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Environment name; defaults to `ktf-<uuid>`
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Cluster to deploy onto (required)
    pub fn with_cluster(mut self, cluster: Arc<dyn Cluster>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    /// Add one addon; addons deploy in the order added
    pub fn with_addon(mut self, addon: Arc<dyn Addon>) -> Self {
        self.addons.push(addon);
        self
    }

    /// Add several addons
    pub fn with_addons(mut self, addons: impl IntoIterator<Item = Arc<dyn Addon>>) -> Self {
        self.addons.extend(addons);
        self
    }

    /// Poll interval for [`Environment::wait_for_ready`]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Deploy every addon, in order, stopping at the first failure
    pub async fn build(self, ctx: &Context) -> Result<Environment> {
        let cluster = self
            .cluster
            .ok_or_else(|| Error::config("environment requires a cluster"))?;
        let name = self
            .name
            .unwrap_or_else(|| format!("ktf-{}", uuid::Uuid::new_v4()));

        info!(
            environment = %name,
            cluster = %cluster.name(),
            addons = self.addons.len(),
            "building environment"
        );
        for addon in self.addons {
            cluster.deploy_addon(ctx, addon).await?;
        }

        Ok(Environment {
            name,
            cluster,
            poll_interval: self
                .poll_interval
                .unwrap_or(DEFAULT_ENVIRONMENT_POLL_INTERVAL),
        })
    }
}

/// A running test environment
pub struct Environment {
    name: String,
    cluster: Arc<dyn Cluster>,
    poll_interval: Duration,
}

impl Environment {
    /// Environment name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The cluster backing this environment
    pub fn cluster(&self) -> &Arc<dyn Cluster> {
        &self.cluster
    }

    /// Registered addon by name
    pub fn get_addon(&self, name: &str) -> Option<Arc<dyn Addon>> {
        self.cluster.get_addon(name)
    }

    /// Union of every registered addon's readiness
    pub async fn ready(&self, ctx: &Context) -> Result<Readiness> {
        let addons = self.cluster.list_addons();
        let checks = addons
            .iter()
            .map(|addon| addon.ready(ctx, self.cluster.as_ref()));
        let snapshots = futures::future::try_join_all(checks).await?;
        Ok(snapshots
            .into_iter()
            .fold(Readiness::ready(), Readiness::merge))
    }

    /// Wait until every addon reports ready or `ctx` ends
    pub async fn wait_for_ready(&self, ctx: &Context) -> Result<()> {
        let operation = format!("environment {} ready", self.name);
        poll_until_ready(ctx, self.poll_interval, &operation, || self.ready(ctx)).await
    }

    /// Diagnostics from every addon, keyed `<addon>/<file>`.
    ///
    /// An addon that fails to produce diagnostics is logged and skipped.
    pub async fn dump_diagnostics(&self, ctx: &Context) -> Diagnostics {
        let mut out = Diagnostics::new();
        for addon in self.cluster.list_addons() {
            match addon.dump_diagnostics(ctx, self.cluster.as_ref()).await {
                Ok(files) => {
                    for (file, contents) in files {
                        out.insert(format!("{}/{}", addon.name(), file), contents);
                    }
                }
                Err(e) => warn!(addon = %addon.name(), error = %e, "failed to collect diagnostics"),
            }
        }
        out
    }

    /// Delete every addon, dependents first, then run the cluster's own cleanup
    #[instrument(skip_all, fields(environment = %self.name))]
    pub async fn cleanup(&self, ctx: &Context) -> Result<()> {
        let order = crate::dependencies::teardown_order(
            ctx,
            self.cluster.as_ref(),
            &self.cluster.list_addons(),
        )
        .await?;
        for name in order {
            if let Some(addon) = self.cluster.get_addon(&name) {
                self.cluster.delete_addon(ctx, addon).await?;
            }
        }
        self.cluster.cleanup(ctx).await?;
        info!("environment cleaned up");
        Ok(())
    }
}

//! Attach to a cluster that already exists
//!
//! The existing-cluster backend never provisions or destroys anything: its
//! `cleanup` removes the addons deployed through it and leaves the cluster
//! running.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::{debug, info, instrument};

use ktf_common::{Context, Error, Result};

use crate::addon::Addon;
use crate::cluster::{Cluster, ClusterType, IpFamily};
use crate::control_plane::{ControlPlane, KubeControlPlane};
use crate::registry::{AddonRegistry, DEFAULT_DEPENDENCY_POLL_INTERVAL};

/// Default cluster name when none is given
pub const DEFAULT_EXISTING_CLUSTER_NAME: &str = "existing";

/// Builder for [`ExistingCluster`]
pub struct ExistingClusterBuilder {
    name: Option<String>,
    kubeconfig: Option<PathBuf>,
    context: Option<String>,
    config: Option<Config>,
    infer: bool,
    ip_family: IpFamily,
    poll_interval: Duration,
    control_plane: Option<Arc<dyn ControlPlane>>,
}

impl Default for ExistingClusterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ExistingClusterBuilder {
    /// Builder with no connection source; one must be chosen before `build`
    pub fn new() -> Self {
        Self {
            name: None,
            kubeconfig: None,
            context: None,
            config: None,
            infer: false,
            ip_family: IpFamily::default(),
            poll_interval: DEFAULT_DEPENDENCY_POLL_INTERVAL,
            control_plane: None,
        }
    }

    /// Cluster name; defaults to the kubeconfig context, then `existing`
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Connect using the kubeconfig at `path`
    pub fn with_kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    /// Use `context` from the kubeconfig instead of its current context
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Connect using an already-loaded config
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Fall back to `KUBECONFIG`, `~/.kube/config` or in-cluster config
    pub fn infer(mut self) -> Self {
        self.infer = true;
        self
    }

    /// Network IP family of the cluster
    pub fn with_ip_family(mut self, ip_family: IpFamily) -> Self {
        self.ip_family = ip_family;
        self
    }

    /// Poll interval for dependency readiness waits
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Use this control plane instead of one built from the connection config
    pub fn with_control_plane(mut self, control_plane: Arc<dyn ControlPlane>) -> Self {
        self.control_plane = Some(control_plane);
        self
    }

    /// Resolve the connection config and build the cluster handle.
    ///
    /// Fails with [`Error::Config`] before any network call when no
    /// connection source was chosen.
    pub async fn build(self) -> Result<ExistingCluster> {
        let options = KubeConfigOptions {
            context: self.context.clone(),
            ..Default::default()
        };

        let (config, context_name) = match (self.config, &self.kubeconfig) {
            (Some(config), _) => (config, None),
            (None, Some(path)) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    Error::config(format!(
                        "failed to read kubeconfig {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                let context_name = self
                    .context
                    .clone()
                    .or_else(|| kubeconfig.current_context.clone());
                let config = Config::from_custom_kubeconfig(kubeconfig, &options)
                    .await
                    .map_err(|e| Error::config(format!("failed to load kubeconfig: {}", e)))?;
                (config, context_name)
            }
            (None, None) if self.infer => {
                let config = Config::infer()
                    .await
                    .map_err(|e| Error::config(format!("failed to infer kubeconfig: {}", e)))?;
                (config, None)
            }
            (None, None) => {
                return Err(Error::config(
                    "existing cluster requires a kubeconfig path, a config, or infer()",
                ))
            }
        };

        let name = self
            .name
            .or(context_name)
            .unwrap_or_else(|| DEFAULT_EXISTING_CLUSTER_NAME.to_string());

        let control_plane = match self.control_plane {
            Some(cp) => cp,
            None => Arc::new(KubeControlPlane::new(Client::try_from(config.clone())?)),
        };

        info!(cluster = %name, server = %config.cluster_url, "attached to existing cluster");
        Ok(ExistingCluster {
            name,
            config,
            ip_family: self.ip_family,
            control_plane,
            registry: AddonRegistry::new().with_poll_interval(self.poll_interval),
        })
    }
}

/// A cluster ktf attaches to but does not own
pub struct ExistingCluster {
    name: String,
    config: Config,
    ip_family: IpFamily,
    control_plane: Arc<dyn ControlPlane>,
    registry: AddonRegistry,
}

impl ExistingCluster {
    /// Start building an existing-cluster handle
    pub fn builder() -> ExistingClusterBuilder {
        ExistingClusterBuilder::new()
    }
}

#[async_trait]
impl Cluster for ExistingCluster {
    fn name(&self) -> &str {
        &self.name
    }

    fn cluster_type(&self) -> ClusterType {
        ClusterType::Existing
    }

    fn ip_family(&self) -> IpFamily {
        self.ip_family
    }

    fn control_plane(&self) -> Arc<dyn ControlPlane> {
        self.control_plane.clone()
    }

    fn connection(&self) -> &Config {
        &self.config
    }

    async fn deploy_addon(&self, ctx: &Context, addon: Arc<dyn Addon>) -> Result<()> {
        self.registry.deploy(ctx, self, addon).await
    }

    async fn delete_addon(&self, ctx: &Context, addon: Arc<dyn Addon>) -> Result<()> {
        self.registry.delete(ctx, self, addon.name()).await
    }

    fn get_addon(&self, name: &str) -> Option<Arc<dyn Addon>> {
        self.registry.get(name)
    }

    fn list_addons(&self) -> Vec<Arc<dyn Addon>> {
        self.registry.list()
    }

    #[instrument(skip_all, fields(cluster = %self.name))]
    async fn cleanup(&self, ctx: &Context) -> Result<()> {
        self.registry.delete_all(ctx, self).await?;
        debug!("addons removed, leaving existing cluster running");
        Ok(())
    }
}

//! The `Cluster` abstraction shared by every provisioning backend

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use ktf_common::{Context, Error, Result};

use crate::addon::Addon;
use crate::control_plane::ControlPlane;

/// Provisioning backend that produced a cluster
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClusterType {
    /// Local container-based cluster
    Kind,
    /// Google Kubernetes Engine
    Gke,
    /// Azure Kubernetes Service
    Aks,
    /// VM-based OpenShift local cluster
    Crc,
    /// A pre-existing cluster ktf attaches to but never destroys
    Existing,
}

impl fmt::Display for ClusterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Kind => "kind",
            Self::Gke => "gke",
            Self::Aks => "aks",
            Self::Crc => "crc",
            Self::Existing => "existing",
        };
        f.write_str(s)
    }
}

/// IP family of the cluster's pod and service networks
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum IpFamily {
    /// IPv4 only
    #[default]
    Ipv4,
    /// IPv6 only
    Ipv6,
    /// Dual stack
    Dual,
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ipv4 => "ipv4",
            Self::Ipv6 => "ipv6",
            Self::Dual => "dual",
        };
        f.write_str(s)
    }
}

impl FromStr for IpFamily {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ipv4" => Ok(Self::Ipv4),
            "ipv6" => Ok(Self::Ipv6),
            "dual" => Ok(Self::Dual),
            other => Err(Error::config(format!("unknown IP family: {}", other))),
        }
    }
}

/// Kubernetes server version, parsed from the git version string
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    /// Major version
    pub major: u64,
    /// Minor version
    pub minor: u64,
    /// Patch version
    pub patch: u64,
}

impl Version {
    /// Parse a server git version such as `v1.31.2` or `v1.30.4-gke.1348000`.
    ///
    /// Pre-release and build suffixes are dropped. A missing patch component
    /// is treated as zero.
    pub fn parse(git_version: &str) -> Result<Self> {
        let trimmed = git_version.trim().trim_start_matches('v');
        let core = trimmed
            .split(['-', '+'])
            .next()
            .unwrap_or_default();

        let mut parts = core.split('.');
        let mut next = |required: bool| -> Result<u64> {
            match parts.next() {
                Some(p) => p.parse().map_err(|_| {
                    Error::serialization(format!("invalid server version: {}", git_version))
                }),
                None if required => Err(Error::serialization(format!(
                    "invalid server version: {}",
                    git_version
                ))),
                None => Ok(0),
            }
        };

        Ok(Self {
            major: next(true)?,
            minor: next(true)?,
            patch: next(false)?,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// A provisioned Kubernetes cluster with its addon registry.
///
/// Backends embed an [`AddonRegistry`](crate::AddonRegistry) and delegate the
/// addon operations to it, so the deploy/delete protocol is the same for
/// every backend.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Cluster name, unique per provisioning run
    fn name(&self) -> &str;

    /// Backend that produced the cluster
    fn cluster_type(&self) -> ClusterType;

    /// Network IP family
    fn ip_family(&self) -> IpFamily;

    /// Typed control-plane client
    fn control_plane(&self) -> Arc<dyn ControlPlane>;

    /// Raw connection descriptor for the API server
    fn connection(&self) -> &kube::Config;

    /// Server version reported by the control plane
    async fn version(&self, ctx: &Context) -> Result<Version> {
        let cp = self.control_plane();
        ctx.run(format!("server version of cluster {}", self.name()), async move {
            cp.server_version().await
        })
        .await
    }

    /// Deploy an addon after its dependencies are ready.
    ///
    /// Fails with [`Error::AlreadyRegistered`] when an addon of the same name
    /// is present. After any error the addon is not registered.
    async fn deploy_addon(&self, ctx: &Context, addon: Arc<dyn Addon>) -> Result<()>;

    /// Delete a registered addon; a no-op when it is not registered
    async fn delete_addon(&self, ctx: &Context, addon: Arc<dyn Addon>) -> Result<()>;

    /// Look up a registered addon by name
    fn get_addon(&self, name: &str) -> Option<Arc<dyn Addon>>;

    /// All registered addons, ordered by name
    fn list_addons(&self) -> Vec<Arc<dyn Addon>>;

    /// Backend-specific teardown
    async fn cleanup(&self, ctx: &Context) -> Result<()>;
}

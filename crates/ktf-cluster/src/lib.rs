//! Cluster and addon orchestration for ephemeral Kubernetes test environments
//!
//! A [`Cluster`] is a provisioned Kubernetes cluster with a registry of
//! [`Addon`]s. Addons deploy through [`Cluster::deploy_addon`], which waits
//! for each declared dependency to report ready before the addon's own
//! deploy runs. [`Environment`] groups a cluster with its addons, and
//! [`Cleaner`] tears down what a test created: objects, then manifests,
//! then namespaces with bounded concurrency.
//!
//! Every operation that can block takes a [`Context`] carrying a
//! cancellation token and an optional deadline.

#![deny(missing_docs)]

pub mod addon;
pub mod addons;
pub mod cleaner;
pub mod cluster;
pub mod control_plane;
pub mod dependencies;
pub mod environment;
pub mod existing;
pub mod kubeconfig;
pub mod namespace;
pub mod readiness;
pub mod registry;

#[cfg(test)]
#[allow(missing_docs)]
mod fake;

pub use addon::{Addon, Diagnostics, Readiness};
pub use addons::{ManifestAddon, ManifestAddonBuilder};
pub use cleaner::Cleaner;
pub use cluster::{Cluster, ClusterType, IpFamily, Version};
pub use control_plane::{ControlPlane, KubeControlPlane, ObjectRef};
pub use environment::{Environment, EnvironmentBuilder};
pub use existing::{ExistingCluster, ExistingClusterBuilder};
pub use kubeconfig::TempKubeconfig;
pub use ktf_common::{Context, ContextError, Error, Result};
pub use namespace::{generate_namespace, label_namespace};
pub use readiness::poll_until_ready;
pub use registry::AddonRegistry;

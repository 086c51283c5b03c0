//! Generic addon that installs a set of manifests into one namespace
//!
//! Namespaced objects that name no namespace are placed into the addon's
//! namespace when the addon is built.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::ObjectMeta;
use tracing::{debug, info};

use ktf_common::manifest::default_namespace;
use ktf_common::{Context, Error, Result, LABEL_MANAGED_BY, LABEL_MANAGED_BY_KTF};

use crate::addon::{Addon, Diagnostics, Readiness};
use crate::cluster::Cluster;
use crate::readiness::namespace_readiness;

/// Builder for [`ManifestAddon`]
#[derive(Clone, Debug)]
pub struct ManifestAddonBuilder {
    name: String,
    namespace: Option<String>,
    manifests: Vec<String>,
    dependencies: Vec<String>,
}

impl ManifestAddonBuilder {
    /// Addon called `name`; the namespace defaults to the name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            manifests: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    /// Namespace the addon's workloads live in
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Manifest text to apply; applied in the order added
    pub fn with_manifest(mut self, manifest: impl Into<String>) -> Self {
        self.manifests.push(manifest.into());
        self
    }

    /// Several manifest texts
    pub fn with_manifests<I, S>(mut self, manifests: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.manifests.extend(manifests.into_iter().map(Into::into));
        self
    }

    /// Addon that must be ready before this one deploys
    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(name.into());
        self
    }

    /// Validate and freeze the configuration
    pub fn build(self) -> Result<ManifestAddon> {
        if self.name.trim().is_empty() {
            return Err(Error::config("manifest addon name must not be empty"));
        }
        let namespace = self.namespace.unwrap_or_else(|| self.name.clone());
        if namespace.trim().is_empty() {
            return Err(Error::config(format!(
                "manifest addon {} namespace must not be empty",
                self.name
            )));
        }
        let manifests = self
            .manifests
            .iter()
            .enumerate()
            .map(|(index, manifest)| {
                default_namespace(manifest, &namespace).map_err(|e| {
                    Error::config(format!(
                        "manifest addon {} manifest {}: {}",
                        self.name, index, e
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ManifestAddon {
            name: self.name,
            namespace,
            manifests,
            dependencies: self.dependencies,
        })
    }
}

/// Applies manifests into a namespace and is ready when its workloads are
#[derive(Clone, Debug)]
pub struct ManifestAddon {
    name: String,
    namespace: String,
    manifests: Vec<String>,
    dependencies: Vec<String>,
}

impl ManifestAddon {
    /// Start building a manifest addon
    pub fn builder(name: impl Into<String>) -> ManifestAddonBuilder {
        ManifestAddonBuilder::new(name)
    }

    /// Namespace the addon installs into
    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

#[async_trait]
impl Addon for ManifestAddon {
    fn name(&self) -> &str {
        &self.name
    }

    async fn dependencies(&self, _ctx: &Context, _cluster: &dyn Cluster) -> Result<Vec<String>> {
        Ok(self.dependencies.clone())
    }

    async fn deploy(&self, ctx: &Context, cluster: &dyn Cluster) -> Result<()> {
        let cp = cluster.control_plane();
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(self.namespace.clone()),
                labels: Some(BTreeMap::from([(
                    LABEL_MANAGED_BY.to_string(),
                    LABEL_MANAGED_BY_KTF.to_string(),
                )])),
                ..Default::default()
            },
            ..Default::default()
        };
        match ctx
            .run(
                format!("namespace {} created", self.namespace),
                cp.create_namespace(&namespace),
            )
            .await
        {
            Ok(_) => debug!(namespace = %self.namespace, "created addon namespace"),
            Err(e) if e.is_already_exists() => {}
            Err(e) => return Err(e),
        }

        for (index, manifest) in self.manifests.iter().enumerate() {
            ctx.run(
                format!("addon {} manifest {} applied", self.name, index),
                cp.apply_manifest(manifest),
            )
            .await
            .map_err(|e| match e {
                e @ (Error::ContextDone { .. } | Error::Kube { .. }) => e,
                other => Error::addon(&self.name, other.to_string()),
            })?;
        }

        info!(addon = %self.name, namespace = %self.namespace, "applied manifests");
        Ok(())
    }

    async fn delete(&self, ctx: &Context, cluster: &dyn Cluster) -> Result<()> {
        let cp = cluster.control_plane();
        for (index, manifest) in self.manifests.iter().enumerate().rev() {
            let deleted = ctx
                .run(
                    format!("addon {} manifest {} deleted", self.name, index),
                    cp.delete_manifest(manifest),
                )
                .await;
            match deleted {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn ready(&self, ctx: &Context, cluster: &dyn Cluster) -> Result<Readiness> {
        let cp = cluster.control_plane();
        ctx.run(
            format!("addon {} readiness", self.name),
            namespace_readiness(cp.as_ref(), &self.namespace),
        )
        .await
    }

    async fn dump_diagnostics(&self, ctx: &Context, cluster: &dyn Cluster) -> Result<Diagnostics> {
        let cp = cluster.control_plane();
        let deployments = ctx
            .run(
                format!("deployments in {}", self.namespace),
                cp.list_deployments(&self.namespace),
            )
            .await?;
        let daemonsets = ctx
            .run(
                format!("daemonsets in {}", self.namespace),
                cp.list_daemonsets(&self.namespace),
            )
            .await?;

        let mut out = Diagnostics::new();
        out.insert(
            "deployments.json".to_string(),
            serde_json::to_vec_pretty(&deployments).map_err(|e| Error::serialization(e.to_string()))?,
        );
        out.insert(
            "daemonsets.json".to_string(),
            serde_json::to_vec_pretty(&daemonsets).map_err(|e| Error::serialization(e.to_string()))?,
        );
        Ok(out)
    }
}

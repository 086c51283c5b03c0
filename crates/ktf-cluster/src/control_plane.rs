//! Control-plane client seam
//!
//! The orchestration core never talks to `kube::Client` directly. Every read,
//! delete, apply and watch goes through the [`ControlPlane`] trait so the
//! readiness poller, the dependency driver and the [`Cleaner`](crate::Cleaner)
//! can be exercised against in-memory fakes, and so every Kubernetes error is
//! classified ([`Error::NotFound`], [`Error::Conflict`], ...) in one place.
//!
//! [`KubeControlPlane`] is the production implementation.

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Namespace, Service};
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::discovery::ApiResource;
use kube::runtime::wait::{await_condition, conditions};
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, trace};

#[cfg(test)]
use mockall::automock;

use ktf_common::manifest::{build_api_resource, parse_manifests, ManifestObject};
use ktf_common::{Error, Result, FIELD_MANAGER};

use crate::cluster::Version;

/// Reference to a single Kubernetes object by apiVersion, kind and name
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    /// apiVersion (e.g., "apps/v1")
    pub api_version: String,
    /// Kind (e.g., "Deployment")
    pub kind: String,
    /// Namespace for namespaced objects
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl ObjectRef {
    /// Reference a cluster-scoped object
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: None,
            name: name.into(),
        }
    }

    /// Place this reference in a namespace
    pub fn within(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Reference a Namespace object
    pub fn namespace(name: impl Into<String>) -> Self {
        Self::new("v1", "Namespace", name)
    }

    /// Reference a typed object
    pub fn from_resource<K>(obj: &K) -> Self
    where
        K: Resource<DynamicType = ()>,
    {
        Self {
            api_version: K::api_version(&()).into_owned(),
            kind: K::kind(&()).into_owned(),
            namespace: obj.namespace(),
            name: obj.name_any(),
        }
    }

    /// Dynamic API addressing for this object's kind
    pub fn api_resource(&self) -> ApiResource {
        build_api_resource(&self.api_version, &self.kind)
    }

    /// `namespace/name` for namespaced objects, `name` otherwise
    pub fn qualified_name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}/{}", ns, self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.qualified_name())
    }
}

impl From<&ManifestObject> for ObjectRef {
    fn from(obj: &ManifestObject) -> Self {
        Self {
            api_version: obj.api_version.clone(),
            kind: obj.kind.clone(),
            namespace: obj.namespace.clone(),
            name: obj.name.clone(),
        }
    }
}

/// Typed control-plane operations consumed by the orchestration core.
///
/// Implementations map "object absent" to [`Error::NotFound`] on mutating
/// calls and to `Ok(None)` on `get_*` calls; optimistic-concurrency failures
/// surface as [`Error::Conflict`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Kubernetes version reported by the API server
    async fn server_version(&self) -> Result<Version>;

    /// Get a namespace, `None` if it does not exist
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>>;

    /// Create a namespace
    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace>;

    /// Replace a namespace; fails with [`Error::Conflict`] on a stale resourceVersion
    async fn replace_namespace(&self, namespace: &Namespace) -> Result<Namespace>;

    /// Request deletion of a namespace.
    ///
    /// Returns the uid of the namespace being deleted, or `None` when the API
    /// server reports the deletion already complete.
    async fn delete_namespace(&self, name: &str) -> Result<Option<String>>;

    /// Watch a namespace until a deletion of the instance with `uid` is observed
    async fn await_namespace_deleted(&self, name: &str, uid: Option<String>) -> Result<()>;

    /// List Deployments in a namespace
    async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>>;

    /// List DaemonSets in a namespace
    async fn list_daemonsets(&self, namespace: &str) -> Result<Vec<DaemonSet>>;

    /// List Services in a namespace
    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>>;

    /// Get a Job, `None` if it does not exist
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>>;

    /// Get any object through the dynamic API, `None` if it does not exist
    async fn get_object(&self, object: &ObjectRef) -> Result<Option<DynamicObject>>;

    /// Delete any object through the dynamic API
    async fn delete_object(&self, object: &ObjectRef) -> Result<()>;

    /// Server-side apply every object in the manifest text, in document order
    async fn apply_manifest(&self, manifest: &str) -> Result<()>;

    /// Delete every object in the manifest text, in reverse document order.
    ///
    /// Objects that are already gone are skipped.
    async fn delete_manifest(&self, manifest: &str) -> Result<()>;
}

/// [`ControlPlane`] backed by a kube-rs client
#[derive(Clone)]
pub struct KubeControlPlane {
    client: Client,
}

impl KubeControlPlane {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// The underlying kube client
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn dynamic_api(&self, ar: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, ar),
            None => Api::all_with(self.client.clone(), ar),
        }
    }

    async fn apply_object(&self, obj: &ManifestObject) -> Result<()> {
        let api = self.dynamic_api(&obj.api_resource, obj.namespace.as_deref());
        let params = PatchParams::apply(FIELD_MANAGER).force();
        api.patch(&obj.name, &params, &Patch::Apply(&obj.value))
            .await
            .map_err(|e| Error::from_kube(e, &obj.kind, &obj.qualified_name()))?;
        trace!(kind = %obj.kind, name = %obj.qualified_name(), "applied manifest object");
        Ok(())
    }
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    async fn server_version(&self) -> Result<Version> {
        let info = self.client.apiserver_version().await?;
        Version::parse(&info.git_version)
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.get_opt(name)
            .await
            .map_err(|e| Error::from_kube(e, "Namespace", name))
    }

    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.create(&PostParams::default(), namespace)
            .await
            .map_err(|e| Error::from_kube(e, "Namespace", &namespace.name_any()))
    }

    async fn replace_namespace(&self, namespace: &Namespace) -> Result<Namespace> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let name = namespace.name_any();
        api.replace(&name, &PostParams::default(), namespace)
            .await
            .map_err(|e| Error::from_kube(e, "Namespace", &name))
    }

    async fn delete_namespace(&self, name: &str) -> Result<Option<String>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let response = api
            .delete(name, &DeleteParams::background())
            .await
            .map_err(|e| Error::from_kube(e, "Namespace", name))?;
        Ok(response.left().and_then(|ns| ns.metadata.uid))
    }

    async fn await_namespace_deleted(&self, name: &str, uid: Option<String>) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let watched = match uid {
            Some(uid) => await_condition(api, name, conditions::is_deleted(&uid)).await,
            None => await_condition(api, name, |ns: Option<&Namespace>| ns.is_none()).await,
        };
        watched.map_err(|e| {
            Error::internal_with_context("await_namespace_deleted", format!("{}: {}", name, e))
        })?;
        debug!(namespace = %name, "observed namespace deletion");
        Ok(())
    }

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_daemonsets(&self, namespace: &str) -> Result<Vec<DaemonSet>> {
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| Error::from_kube(e, "Job", &format!("{}/{}", namespace, name)))
    }

    async fn get_object(&self, object: &ObjectRef) -> Result<Option<DynamicObject>> {
        let api = self.dynamic_api(&object.api_resource(), object.namespace.as_deref());
        api.get_opt(&object.name)
            .await
            .map_err(|e| Error::from_kube(e, &object.kind, &object.qualified_name()))
    }

    async fn delete_object(&self, object: &ObjectRef) -> Result<()> {
        let api = self.dynamic_api(&object.api_resource(), object.namespace.as_deref());
        api.delete(&object.name, &DeleteParams::background())
            .await
            .map_err(|e| Error::from_kube(e, &object.kind, &object.qualified_name()))?;
        Ok(())
    }

    async fn apply_manifest(&self, manifest: &str) -> Result<()> {
        for obj in parse_manifests(manifest)? {
            self.apply_object(&obj).await?;
        }
        Ok(())
    }

    async fn delete_manifest(&self, manifest: &str) -> Result<()> {
        for obj in parse_manifests(manifest)?.iter().rev() {
            match self.delete_object(&ObjectRef::from(obj)).await {
                Ok(()) => trace!(kind = %obj.kind, name = %obj.qualified_name(), "deleted"),
                Err(e) if e.is_not_found() => {
                    trace!(kind = %obj.kind, name = %obj.qualified_name(), "already gone")
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

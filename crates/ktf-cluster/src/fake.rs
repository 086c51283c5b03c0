//! In-memory control plane, cluster and addon for unit tests.
//!
//! `MockControlPlane` covers call-count assertions; these fakes cover the
//! tests that need state, timing or concurrency to be observed.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, DeploymentSpec, DeploymentStatus};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Namespace, Service};
use kube::api::{DynamicObject, ObjectMeta};
use kube::ResourceExt;
use parking_lot::Mutex;
use tokio::time::Instant;

use ktf_common::manifest::parse_manifests;
use ktf_common::{Context, Error, Result};

use crate::addon::{Addon, Diagnostics, Readiness};
use crate::cluster::{Cluster, ClusterType, IpFamily, Version};
use crate::control_plane::{ControlPlane, ObjectRef};
use crate::registry::AddonRegistry;

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// Deployment with the given desired and available replica counts
pub fn deployment(
    namespace: &str,
    name: &str,
    replicas: Option<i32>,
    available: Option<i32>,
) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas,
            ..Default::default()
        }),
        status: Some(DeploymentStatus {
            available_replicas: available,
            ..Default::default()
        }),
    }
}

#[derive(Default)]
struct State {
    namespaces: BTreeMap<String, Namespace>,
    deployments: BTreeMap<Key, Deployment>,
    daemonsets: BTreeMap<Key, DaemonSet>,
    services: BTreeMap<Key, Service>,
    jobs: BTreeMap<Key, Job>,
    objects: HashMap<ObjectRef, DynamicObject>,
    applied: Vec<String>,
    ops: Vec<String>,
    stuck: HashSet<String>,
    deleting: HashMap<String, InFlight>,
    conflicts_remaining: usize,
    resource_version: u64,
}

/// In-memory [`ControlPlane`]
pub struct FakeControlPlane {
    state: Mutex<State>,
    queries: AtomicUsize,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    deletion_delay: Duration,
}

struct InFlight {
    current: Arc<AtomicUsize>,
}

impl InFlight {
    fn enter(current: &Arc<AtomicUsize>, max: &AtomicUsize) -> Self {
        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(now, Ordering::SeqCst);
        Self {
            current: current.clone(),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for FakeControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            queries: AtomicUsize::new(0),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            deletion_delay: Duration::ZERO,
        }
    }

    /// Namespace deletions take `delay` to be observed
    pub fn with_deletion_delay(mut self, delay: Duration) -> Self {
        self.deletion_delay = delay;
        self
    }

    pub fn insert_namespace(&self, name: &str) {
        let mut state = self.state.lock();
        let ns = new_namespace(name, &mut state);
        state.namespaces.insert(name.to_string(), ns);
    }

    pub fn insert_deployment(&self, deployment: Deployment) {
        let ns = deployment.namespace().unwrap_or_default();
        self.state
            .lock()
            .deployments
            .insert(key(&ns, &deployment.name_any()), deployment);
    }

    pub fn insert_object(&self, object: &ObjectRef, data: serde_json::Value) {
        let mut dynamic = DynamicObject::new(&object.name, &object.api_resource()).data(data);
        dynamic.metadata.namespace = object.namespace.clone();
        self.state.lock().objects.insert(object.clone(), dynamic);
    }

    /// The namespace's deletion is never observed
    pub fn stick_namespace(&self, name: &str) {
        self.state.lock().stuck.insert(name.to_string());
    }

    /// The next `n` namespace replaces fail with a conflict
    pub fn fail_replaces_with_conflict(&self, n: usize) {
        self.state.lock().conflicts_remaining = n;
    }

    pub fn namespace(&self, name: &str) -> Option<Namespace> {
        self.state.lock().namespaces.get(name).cloned()
    }

    pub fn namespace_names(&self) -> Vec<String> {
        self.state.lock().namespaces.keys().cloned().collect()
    }

    pub fn has_object(&self, object: &ObjectRef) -> bool {
        self.state.lock().objects.contains_key(object)
    }

    /// Manifest texts passed to `apply_manifest`, in call order
    pub fn applied_manifests(&self) -> Vec<String> {
        self.state.lock().applied.clone()
    }

    /// Mutating operations, in call order
    pub fn ops(&self) -> Vec<String> {
        self.state.lock().ops.clone()
    }

    /// Total number of trait calls made
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Highest number of namespace deletions observed between the delete
    /// request and the confirmed removal
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn query(&self) {
        self.queries.fetch_add(1, Ordering::SeqCst);
    }
}

fn new_namespace(name: &str, state: &mut State) -> Namespace {
    state.resource_version += 1;
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            uid: Some(uuid::Uuid::new_v4().to_string()),
            resource_version: Some(state.resource_version.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn in_namespace<T: Clone>(map: &BTreeMap<Key, T>, namespace: &str) -> Vec<T> {
    map.iter()
        .filter(|((ns, _), _)| ns == namespace)
        .map(|(_, v)| v.clone())
        .collect()
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn server_version(&self) -> Result<Version> {
        self.query();
        Version::parse("v1.31.0")
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        self.query();
        Ok(self.namespace(name))
    }

    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace> {
        self.query();
        let name = namespace.name_any();
        let mut state = self.state.lock();
        if state.namespaces.contains_key(&name) {
            return Err(Error::already_exists("Namespace", name));
        }
        let mut created = namespace.clone();
        let fresh = new_namespace(&name, &mut state);
        created.metadata.uid = fresh.metadata.uid;
        created.metadata.resource_version = fresh.metadata.resource_version;
        state.namespaces.insert(name.clone(), created.clone());
        state.ops.push(format!("create_namespace {}", name));
        Ok(created)
    }

    async fn replace_namespace(&self, namespace: &Namespace) -> Result<Namespace> {
        self.query();
        let name = namespace.name_any();
        let mut state = self.state.lock();
        if state.conflicts_remaining > 0 {
            state.conflicts_remaining -= 1;
            return Err(Error::conflict("Namespace", name));
        }
        let current_version = match state.namespaces.get(&name) {
            Some(current) => current.metadata.resource_version.clone(),
            None => return Err(Error::not_found("Namespace", name)),
        };
        if namespace.metadata.resource_version != current_version {
            return Err(Error::conflict("Namespace", name));
        }
        state.resource_version += 1;
        let mut replaced = namespace.clone();
        replaced.metadata.resource_version = Some(state.resource_version.to_string());
        state.namespaces.insert(name, replaced.clone());
        Ok(replaced)
    }

    async fn delete_namespace(&self, name: &str) -> Result<Option<String>> {
        self.query();
        let mut state = self.state.lock();
        state.ops.push(format!("delete_namespace {}", name));
        let uid = match state.namespaces.get(name) {
            Some(ns) => ns.metadata.uid.clone(),
            None => return Err(Error::not_found("Namespace", name)),
        };
        if !state.deleting.contains_key(name) {
            let guard = InFlight::enter(&self.in_flight, &self.max_in_flight);
            state.deleting.insert(name.to_string(), guard);
        }
        Ok(uid)
    }

    async fn await_namespace_deleted(&self, name: &str, _uid: Option<String>) -> Result<()> {
        self.query();
        // released once removal is observed or the wait is dropped
        let (_guard, stuck) = {
            let mut state = self.state.lock();
            (state.deleting.remove(name), state.stuck.contains(name))
        };
        if stuck {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(self.deletion_delay).await;
        let mut state = self.state.lock();
        state.namespaces.remove(name);
        state.deployments.retain(|(ns, _), _| ns != name);
        state.daemonsets.retain(|(ns, _), _| ns != name);
        state.objects.retain(|o, _| o.namespace.as_deref() != Some(name));
        Ok(())
    }

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>> {
        self.query();
        Ok(in_namespace(&self.state.lock().deployments, namespace))
    }

    async fn list_daemonsets(&self, namespace: &str) -> Result<Vec<DaemonSet>> {
        self.query();
        Ok(in_namespace(&self.state.lock().daemonsets, namespace))
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>> {
        self.query();
        Ok(in_namespace(&self.state.lock().services, namespace))
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>> {
        self.query();
        Ok(self.state.lock().jobs.get(&key(namespace, name)).cloned())
    }

    async fn get_object(&self, object: &ObjectRef) -> Result<Option<DynamicObject>> {
        self.query();
        Ok(self.state.lock().objects.get(object).cloned())
    }

    async fn delete_object(&self, object: &ObjectRef) -> Result<()> {
        self.query();
        let mut state = self.state.lock();
        state.ops.push(format!("delete_object {}", object));
        match state.objects.remove(object) {
            Some(_) => Ok(()),
            None => Err(Error::not_found(&object.kind, object.qualified_name())),
        }
    }

    async fn apply_manifest(&self, manifest: &str) -> Result<()> {
        self.query();
        let objects = parse_manifests(manifest)?;
        let mut state = self.state.lock();
        state.applied.push(manifest.to_string());
        for obj in objects {
            match obj.kind.as_str() {
                "Namespace" => {
                    let ns = new_namespace(&obj.name, &mut state);
                    state.namespaces.entry(obj.name.clone()).or_insert(ns);
                }
                "Deployment" => {
                    // applied Deployments start with nothing available
                    let ns = obj.namespace.clone().unwrap_or_default();
                    let replicas = obj
                        .value
                        .pointer("/spec/replicas")
                        .and_then(|r| r.as_i64())
                        .map(|r| r as i32);
                    state
                        .deployments
                        .insert(key(&ns, &obj.name), deployment(&ns, &obj.name, replicas, None));
                }
                _ => {}
            }
            let dynamic: DynamicObject = serde_json::from_value(obj.value.clone())
                .map_err(|e| Error::serialization(e.to_string()))?;
            state.objects.insert(ObjectRef::from(&obj), dynamic);
        }
        Ok(())
    }

    async fn delete_manifest(&self, manifest: &str) -> Result<()> {
        self.query();
        let objects = parse_manifests(manifest)?;
        let mut state = self.state.lock();
        for obj in objects.iter().rev() {
            let object = ObjectRef::from(obj);
            state.ops.push(format!("delete_manifest_object {}", object));
            state.objects.remove(&object);
            if obj.kind == "Deployment" {
                let ns = obj.namespace.clone().unwrap_or_default();
                state.deployments.remove(&key(&ns, &obj.name));
            }
        }
        Ok(())
    }
}

/// In-memory [`Cluster`] over a [`FakeControlPlane`]
pub struct FakeCluster {
    name: String,
    cp: Arc<FakeControlPlane>,
    config: kube::Config,
    registry: AddonRegistry,
    cleanups: AtomicUsize,
}

impl FakeCluster {
    pub fn new(name: &str) -> Self {
        Self::with_control_plane(name, FakeControlPlane::new())
    }

    pub fn with_control_plane(name: &str, cp: FakeControlPlane) -> Self {
        Self {
            name: name.to_string(),
            cp: Arc::new(cp),
            config: kube::Config::new("https://127.0.0.1:6443".parse().unwrap()),
            registry: AddonRegistry::new().with_poll_interval(Duration::from_millis(10)),
            cleanups: AtomicUsize::new(0),
        }
    }

    /// Dependency waits poll at `interval`
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.registry = AddonRegistry::new().with_poll_interval(interval);
        self
    }

    pub fn fake(&self) -> &FakeControlPlane {
        &self.cp
    }

    pub fn registry(&self) -> &AddonRegistry {
        &self.registry
    }

    pub fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Cluster for FakeCluster {
    fn name(&self) -> &str {
        &self.name
    }

    fn cluster_type(&self) -> ClusterType {
        ClusterType::Kind
    }

    fn ip_family(&self) -> IpFamily {
        IpFamily::Ipv4
    }

    fn control_plane(&self) -> Arc<dyn ControlPlane> {
        self.cp.clone()
    }

    fn connection(&self) -> &kube::Config {
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

    async fn cleanup(&self, ctx: &Context) -> Result<()> {
        self.registry.delete_all(ctx, self).await?;
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Scripted [`Addon`] that records what happened to it
pub struct FakeAddon {
    name: String,
    dependencies: Vec<String>,
    ready_after: usize,
    deploy_error: Option<String>,
    ready_error: Option<String>,
    log: Arc<Mutex<Vec<String>>>,
    ready_calls: AtomicUsize,
    deploy_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    deployed_at: Mutex<Option<Instant>>,
}

impl FakeAddon {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            dependencies: Vec::new(),
            ready_after: 0,
            deploy_error: None,
            ready_error: None,
            log: Arc::new(Mutex::new(Vec::new())),
            ready_calls: AtomicUsize::new(0),
            deploy_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            deployed_at: Mutex::new(None),
        }
    }

    pub fn depends_on(mut self, name: &str) -> Self {
        self.dependencies.push(name.to_string());
        self
    }

    /// `ready` reports blocked for the first `n` calls
    pub fn ready_after(mut self, n: usize) -> Self {
        self.ready_after = n;
        self
    }

    pub fn failing_deploy(mut self, message: &str) -> Self {
        self.deploy_error = Some(message.to_string());
        self
    }

    /// `ready` fails with a terminal startup-job failure
    pub fn failing_readiness(mut self, message: &str) -> Self {
        self.ready_error = Some(message.to_string());
        self
    }

    /// Append "deploy <name>" / "delete <name>" entries to a shared log
    pub fn with_log(mut self, log: Arc<Mutex<Vec<String>>>) -> Self {
        self.log = log;
        self
    }

    pub fn deploy_calls(&self) -> usize {
        self.deploy_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn ready_calls(&self) -> usize {
        self.ready_calls.load(Ordering::SeqCst)
    }

    pub fn deployed_at(&self) -> Option<Instant> {
        *self.deployed_at.lock()
    }
}

#[async_trait]
impl Addon for FakeAddon {
    fn name(&self) -> &str {
        &self.name
    }

    async fn dependencies(&self, _ctx: &Context, _cluster: &dyn Cluster) -> Result<Vec<String>> {
        Ok(self.dependencies.clone())
    }

    async fn deploy(&self, _ctx: &Context, _cluster: &dyn Cluster) -> Result<()> {
        self.deploy_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.deploy_error {
            return Err(Error::addon(&self.name, message.clone()));
        }
        *self.deployed_at.lock() = Some(Instant::now());
        self.log.lock().push(format!("deploy {}", self.name));
        Ok(())
    }

    async fn delete(&self, _ctx: &Context, _cluster: &dyn Cluster) -> Result<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push(format!("delete {}", self.name));
        Ok(())
    }

    async fn ready(&self, _ctx: &Context, _cluster: &dyn Cluster) -> Result<Readiness> {
        let calls = self.ready_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.ready_error {
            return Err(Error::readiness_failed(
                format!("Job {}/startup", self.name),
                message.clone(),
            ));
        }
        if calls >= self.ready_after {
            Ok(Readiness::ready())
        } else {
            Ok(Readiness::blocked_by(
                ObjectRef::new("apps/v1", "Deployment", &self.name).within(&self.name),
            ))
        }
    }

    async fn dump_diagnostics(&self, _ctx: &Context, _cluster: &dyn Cluster) -> Result<Diagnostics> {
        let mut out = Diagnostics::new();
        out.insert("addon.txt".to_string(), self.name.as_bytes().to_vec());
        Ok(out)
    }
}

//! Teardown of everything a test created
//!
//! A [`Cleaner`] accumulates three kinds of records while a test runs and
//! deletes them in a fixed order when [`Cleaner::cleanup`] is called:
//!
//! 1. discrete objects, last added first
//! 2. raw manifests, in the order they were added
//! 3. namespaces, concurrently with at most `concurrency` in flight
//!
//! Object and manifest deletes are retried on transient API errors (429,
//! 5xx). A successful run drains the records it deleted. A failed run keeps
//! them, so calling `cleanup` again re-attempts everything and succeeds by
//! tolerating objects that are already gone.

use std::sync::Arc;

use kube::Resource;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use ktf_common::retry::{retry_transient, RetryConfig};
use ktf_common::{Context, Error, Result};

use crate::cluster::Cluster;
use crate::control_plane::{ControlPlane, ObjectRef};

/// Namespace deletions allowed in flight at once
pub const DEFAULT_NAMESPACE_CONCURRENCY: usize = 8;

#[derive(Clone, Default)]
struct CleanupSet {
    objects: Vec<ObjectRef>,
    manifests: Vec<String>,
    namespaces: Vec<String>,
}

impl CleanupSet {
    /// Remove the records `done` covered. Records are append-only, so a
    /// snapshot is always a prefix of the live set.
    fn drain_prefix(&mut self, done: &CleanupSet) {
        self.objects.drain(..done.objects.len().min(self.objects.len()));
        self.manifests.drain(..done.manifests.len().min(self.manifests.len()));
        self.namespaces.drain(..done.namespaces.len().min(self.namespaces.len()));
    }
}

/// Deferred deletion of test objects, manifests and namespaces
pub struct Cleaner {
    cluster: String,
    control_plane: Arc<dyn ControlPlane>,
    records: Mutex<CleanupSet>,
    concurrency: usize,
    retry: RetryConfig,
}

impl Cleaner {
    /// Cleaner for objects on `cluster`
    pub fn new(cluster: &dyn Cluster) -> Self {
        Self::for_control_plane(cluster.name(), cluster.control_plane())
    }

    /// Cleaner over a bare control plane, e.g. from the CLI
    pub fn for_control_plane(name: impl Into<String>, control_plane: Arc<dyn ControlPlane>) -> Self {
        Self {
            cluster: name.into(),
            control_plane,
            records: Mutex::new(CleanupSet::default()),
            concurrency: DEFAULT_NAMESPACE_CONCURRENCY,
            retry: RetryConfig::default(),
        }
    }

    /// Bound concurrent namespace deletions (minimum 1)
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Backoff for object and manifest deletes that fail transiently
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Configured namespace concurrency
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Record an object for deletion
    pub fn add(&self, object: ObjectRef) {
        self.records.lock().objects.push(object);
    }

    /// Record a typed object for deletion
    pub fn add_resource<K>(&self, resource: &K)
    where
        K: Resource<DynamicType = ()>,
    {
        self.add(ObjectRef::from_resource(resource));
    }

    /// Record manifest text; cleanup deletes what that exact text created
    pub fn add_manifest(&self, manifest: impl Into<String>) {
        self.records.lock().manifests.push(manifest.into());
    }

    /// Record a namespace for deletion
    pub fn add_namespace(&self, namespace: impl Into<String>) {
        self.records.lock().namespaces.push(namespace.into());
    }

    /// Recorded namespaces not yet cleaned up, in insertion order
    pub fn namespaces(&self) -> Vec<String> {
        self.records.lock().namespaces.clone()
    }

    /// Delete everything recorded.
    ///
    /// Object and manifest stages stop at the first error that is not
    /// "not found". The namespace stage attempts every namespace and reports
    /// all failures together in [`Error::NamespaceCleanup`]. Only a fully
    /// successful run drains the records; anything added while it ran stays.
    #[instrument(skip_all, fields(cluster = %self.cluster))]
    pub async fn cleanup(&self, ctx: &Context) -> Result<()> {
        let snapshot = self.records.lock().clone();
        info!(
            objects = snapshot.objects.len(),
            manifests = snapshot.manifests.len(),
            namespaces = snapshot.namespaces.len(),
            "cleaning up"
        );

        for object in snapshot.objects.iter().rev() {
            let operation = format!("{} deleted", object);
            let deleted = retry_transient(ctx, &self.retry, &operation, || {
                ctx.run(operation.clone(), self.control_plane.delete_object(object))
            })
            .await;
            match deleted {
                Ok(()) => debug!(object = %object, "deleted"),
                Err(e) if e.is_not_found() => debug!(object = %object, "already gone"),
                Err(e) => return Err(e),
            }
        }

        for (index, manifest) in snapshot.manifests.iter().enumerate() {
            let operation = format!("manifest {} deleted", index);
            let deleted = retry_transient(ctx, &self.retry, &operation, || {
                ctx.run(operation.clone(), self.control_plane.delete_manifest(manifest))
            })
            .await;
            match deleted {
                Ok(()) => debug!(manifest = index, "deleted manifest"),
                Err(e) if e.is_not_found() => debug!(manifest = index, "manifest already gone"),
                Err(e) => return Err(e),
            }
        }

        self.cleanup_namespaces(ctx, snapshot.namespaces.clone()).await?;
        self.records.lock().drain_prefix(&snapshot);
        Ok(())
    }

    async fn cleanup_namespaces(&self, ctx: &Context, namespaces: Vec<String>) -> Result<()> {
        if namespaces.is_empty() {
            return Ok(());
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        for namespace in namespaces {
            let semaphore = semaphore.clone();
            let control_plane = self.control_plane.clone();
            let ctx = ctx.clone();
            tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => delete_namespace(&ctx, control_plane.as_ref(), &namespace).await,
                    Err(e) => Err(Error::internal_with_context("namespace cleanup", e.to_string())),
                };
                (namespace, result)
            });
        }

        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((namespace, Ok(()))) => debug!(namespace = %namespace, "namespace deleted"),
                Ok((namespace, Err(e))) => {
                    warn!(namespace = %namespace, error = %e, "namespace cleanup failed");
                    failures.push((namespace, e.to_string()));
                }
                Err(e) => failures.push(("<unknown>".to_string(), e.to_string())),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            failures.sort();
            Err(Error::NamespaceCleanup { failures })
        }
    }
}

async fn delete_namespace(ctx: &Context, cp: &dyn ControlPlane, namespace: &str) -> Result<()> {
    let requested = ctx
        .run(
            format!("namespace {} delete requested", namespace),
            cp.delete_namespace(namespace),
        )
        .await;
    let uid = match requested {
        Ok(uid) => uid,
        Err(e) if e.is_not_found() => return Ok(()),
        Err(e) => return Err(e),
    };

    ctx.run(
        format!("namespace {} deleted", namespace),
        cp.await_namespace_deleted(namespace, uid),
    )
    .await
}

//! Readiness polling
//!
//! [`poll_until_ready`] is the single polling primitive: a ticker drives
//! snapshot checks until the blocking set is empty, a check fails
//! permanently, or the caller's [`Context`] ends. No internal timeout is ever
//! invented; callers bound waits through the context deadline.
//!
//! The `*_readiness` functions compute one snapshot each and the `wait_for_*`
//! wrappers run them through the primitive.

use std::future::Future;
use std::time::Duration;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Service;
use kube::api::DynamicObject;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use ktf_common::{Context, Error, Result};

use crate::addon::Readiness;
use crate::control_plane::{ControlPlane, ObjectRef};

/// Poll interval for Deployments, DaemonSets and Services
pub const DEFAULT_WORKLOAD_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Poll interval for Jobs
pub const DEFAULT_JOB_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Poll interval for custom resource conditions
pub const DEFAULT_CUSTOM_RESOURCE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Run `check` every `interval` until it reports ready.
///
/// The first check runs immediately. A check error that
/// [`is_retryable`](Error::is_retryable) is logged and polled through; any
/// other error is returned as-is. When `ctx` ends first the result is
/// [`Error::ContextDone`] naming `operation` and the objects that were still
/// blocking. An already-ended context returns without calling `check`.
pub async fn poll_until_ready<F, Fut>(
    ctx: &Context,
    interval: Duration,
    operation: &str,
    mut check: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Readiness>>,
{
    if let Some(cause) = ctx.err() {
        return Err(Error::context_done(operation, cause));
    }

    // tokio panics on a zero period
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut blocking: Vec<ObjectRef> = Vec::new();

    loop {
        tokio::select! {
            biased;
            cause = ctx.done() => return Err(Error::context_done(describe(operation, &blocking), cause)),
            _ = ticker.tick() => {}
        }

        let outcome = tokio::select! {
            biased;
            cause = ctx.done() => return Err(Error::context_done(describe(operation, &blocking), cause)),
            outcome = check() => outcome,
        };

        match outcome {
            Ok(readiness) if readiness.is_ready() => {
                debug!(operation = %operation, "ready");
                return Ok(());
            }
            Ok(readiness) => {
                trace!(
                    operation = %operation,
                    blocking = readiness.blocking.len(),
                    "not ready yet"
                );
                blocking = readiness.blocking;
            }
            Err(e) if e.is_retryable() => {
                trace!(operation = %operation, error = %e, "transient error while polling");
            }
            Err(e) => return Err(e),
        }
    }
}

fn describe(operation: &str, blocking: &[ObjectRef]) -> String {
    if blocking.is_empty() {
        return operation.to_string();
    }
    let names: Vec<String> = blocking.iter().map(ToString::to_string).collect();
    format!("{} (blocked by {})", operation, names.join(", "))
}

/// A Deployment is ready when every desired replica is available.
///
/// Unset `spec.replicas` means one.
pub fn deployment_is_ready(deployment: &Deployment) -> bool {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let available = deployment
        .status
        .as_ref()
        .and_then(|s| s.available_replicas)
        .unwrap_or(0);
    available == desired
}

/// A DaemonSet is ready once at least one pod is available
pub fn daemonset_is_ready(daemonset: &DaemonSet) -> bool {
    daemonset
        .status
        .as_ref()
        .and_then(|s| s.number_available)
        .unwrap_or(0)
        >= 1
}

/// Only LoadBalancer Services gate readiness, on an assigned ingress address
pub fn service_is_ready(service: &Service) -> bool {
    let is_load_balancer = service
        .spec
        .as_ref()
        .and_then(|s| s.type_.as_deref())
        == Some("LoadBalancer");
    if !is_load_balancer {
        return true;
    }
    service
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .is_some_and(|ingress| {
            ingress
                .iter()
                .any(|i| i.ip.is_some() || i.hostname.is_some())
        })
}

/// Readiness of every workload in a namespace.
///
/// A missing namespace, or one without any Deployment or DaemonSet yet, is
/// blocked by the namespace itself.
pub async fn namespace_readiness(cp: &dyn ControlPlane, namespace: &str) -> Result<Readiness> {
    if cp.get_namespace(namespace).await?.is_none() {
        return Ok(Readiness::blocked_by(ObjectRef::namespace(namespace)));
    }

    let deployments = cp.list_deployments(namespace).await?;
    let daemonsets = cp.list_daemonsets(namespace).await?;
    if deployments.is_empty() && daemonsets.is_empty() {
        return Ok(Readiness::blocked_by(ObjectRef::namespace(namespace)));
    }

    let mut blocking: Vec<ObjectRef> = deployments
        .iter()
        .filter(|d| !deployment_is_ready(d))
        .map(ObjectRef::from_resource)
        .collect();
    blocking.extend(
        daemonsets
            .iter()
            .filter(|d| !daemonset_is_ready(d))
            .map(ObjectRef::from_resource),
    );
    blocking.extend(
        cp.list_services(namespace)
            .await?
            .iter()
            .filter(|s| !service_is_ready(s))
            .map(ObjectRef::from_resource),
    );

    Ok(Readiness::waiting_on(blocking))
}

fn job_ref(namespace: &str, name: &str) -> ObjectRef {
    ObjectRef::new("batch/v1", "Job", name).within(namespace)
}

fn job_condition(job: &Job, condition_type: &str) -> bool {
    job.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == condition_type && c.status == "True")
        })
}

/// Readiness of a Job; a `Failed` condition is a permanent error
pub async fn job_readiness(cp: &dyn ControlPlane, namespace: &str, name: &str) -> Result<Readiness> {
    let Some(job) = cp.get_job(namespace, name).await? else {
        return Ok(Readiness::blocked_by(job_ref(namespace, name)));
    };

    if job_condition(&job, "Failed") {
        let reason = job
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Failed"))
            .and_then(|c| c.message.clone().or_else(|| c.reason.clone()))
            .unwrap_or_else(|| "job failed".to_string());
        return Err(Error::readiness_failed(
            job_ref(namespace, name).to_string(),
            reason,
        ));
    }

    let succeeded = job.status.as_ref().and_then(|s| s.succeeded).unwrap_or(0);
    if job_condition(&job, "Complete") || succeeded >= 1 {
        Ok(Readiness::ready())
    } else {
        Ok(Readiness::blocked_by(job_ref(namespace, name)))
    }
}

/// Whether `status.conditions[type == condition_type].status` is `"True"`
pub fn has_true_condition(object: &DynamicObject, condition_type: &str) -> bool {
    object
        .data
        .pointer("/status/conditions")
        .and_then(|c| c.as_array())
        .is_some_and(|conditions| {
            conditions.iter().any(|c| {
                c.get("type").and_then(|t| t.as_str()) == Some(condition_type)
                    && c.get("status").and_then(|s| s.as_str()) == Some("True")
            })
        })
}

/// Readiness of an arbitrary object gated on a status condition
pub async fn custom_resource_readiness(
    cp: &dyn ControlPlane,
    object: &ObjectRef,
    condition_type: &str,
) -> Result<Readiness> {
    match cp.get_object(object).await? {
        Some(found) if has_true_condition(&found, condition_type) => Ok(Readiness::ready()),
        _ => Ok(Readiness::blocked_by(object.clone())),
    }
}

/// Wait until every workload in `namespace` is ready
pub async fn wait_for_namespace_ready(
    ctx: &Context,
    cp: &dyn ControlPlane,
    namespace: &str,
    interval: Duration,
) -> Result<()> {
    let operation = format!("namespace {} ready", namespace);
    poll_until_ready(ctx, interval, &operation, || namespace_readiness(cp, namespace)).await
}

/// Wait until a Job completes
pub async fn wait_for_job(
    ctx: &Context,
    cp: &dyn ControlPlane,
    namespace: &str,
    name: &str,
    interval: Duration,
) -> Result<()> {
    let operation = format!("job {}/{} complete", namespace, name);
    poll_until_ready(ctx, interval, &operation, || job_readiness(cp, namespace, name)).await
}

/// Wait until an object reports `condition_type` as `"True"`
pub async fn wait_for_custom_resource(
    ctx: &Context,
    cp: &dyn ControlPlane,
    object: &ObjectRef,
    condition_type: &str,
    interval: Duration,
) -> Result<()> {
    let operation = format!("{} {}", object, condition_type);
    poll_until_ready(ctx, interval, &operation, || {
        custom_resource_readiness(cp, object, condition_type)
    })
    .await
}

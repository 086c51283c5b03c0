//! Dependency-ordered deployment
//!
//! Before an addon deploys, every addon it names must already be registered
//! on the cluster and report ready. Dependencies are never deployed
//! implicitly; the caller controls deployment order, so one level of waiting
//! is enough for transitive correctness.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use ktf_common::{Context, Error, Result};

use crate::addon::Addon;
use crate::cluster::Cluster;
use crate::readiness::poll_until_ready;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Order addon names so every addon comes after its dependencies.
///
/// `graph` maps an addon name to the names it depends on. Dependencies that
/// are not keys of `graph` are ignored. On a cycle, `Err` holds the cycle
/// path with its first name repeated at the end (`a -> b -> a`).
pub fn topological_order(
    graph: &BTreeMap<String, Vec<String>>,
) -> std::result::Result<Vec<String>, Vec<String>> {
    fn visit<'a>(
        name: &'a str,
        graph: &'a BTreeMap<String, Vec<String>>,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
        order: &mut Vec<String>,
    ) -> std::result::Result<(), Vec<String>> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = path.iter().position(|n| *n == name).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
                cycle.push(name.to_string());
                return Err(cycle);
            }
            None => {}
        }

        marks.insert(name, Mark::Visiting);
        path.push(name);
        for dep in graph.get(name).into_iter().flatten() {
            if graph.contains_key(dep) {
                visit(dep, graph, marks, path, order)?;
            }
        }
        path.pop();
        marks.insert(name, Mark::Done);
        order.push(name.to_string());
        Ok(())
    }

    let mut marks = HashMap::new();
    let mut path = Vec::new();
    let mut order = Vec::with_capacity(graph.len());
    for name in graph.keys() {
        visit(name, graph, &mut marks, &mut path, &mut order)?;
    }
    Ok(order)
}

async fn dependency_graph(
    ctx: &Context,
    cluster: &dyn Cluster,
    addons: &[Arc<dyn Addon>],
) -> Result<BTreeMap<String, Vec<String>>> {
    let mut graph = BTreeMap::new();
    for addon in addons {
        graph.insert(
            addon.name().to_string(),
            addon.dependencies(ctx, cluster).await?,
        );
    }
    Ok(graph)
}

/// Names of `addons` in the order they can be deleted: dependents first
pub async fn teardown_order(
    ctx: &Context,
    cluster: &dyn Cluster,
    addons: &[Arc<dyn Addon>],
) -> Result<Vec<String>> {
    let graph = dependency_graph(ctx, cluster, addons).await?;
    let mut order = topological_order(&graph).map_err(|cycle| Error::DependencyCycle { cycle })?;
    order.reverse();
    Ok(order)
}

/// Block until every dependency of `addon` is registered on `cluster` and ready.
///
/// Fails with [`Error::DependencyCycle`] when the registered addons plus
/// `addon` form a cycle, [`Error::DependencyNotFound`] when a dependency is
/// not registered, [`Error::DependencyNotReady`] when `ctx` ends while a
/// dependency is still converging, and [`Error::DependencyFailed`] when a
/// dependency's readiness check fails permanently.
pub async fn wait_for_dependencies(
    ctx: &Context,
    cluster: &dyn Cluster,
    addon: &dyn Addon,
    interval: Duration,
) -> Result<()> {
    let dependencies = addon.dependencies(ctx, cluster).await?;
    if dependencies.is_empty() {
        return Ok(());
    }

    let others: Vec<Arc<dyn Addon>> = cluster
        .list_addons()
        .into_iter()
        .filter(|a| a.name() != addon.name())
        .collect();
    let mut graph = dependency_graph(ctx, cluster, &others).await?;
    graph.insert(addon.name().to_string(), dependencies.clone());
    topological_order(&graph).map_err(|cycle| Error::DependencyCycle { cycle })?;

    let mut resolved = Vec::with_capacity(dependencies.len());
    for name in &dependencies {
        let dependency = cluster
            .get_addon(name)
            .ok_or_else(|| Error::DependencyNotFound {
                addon: addon.name().to_string(),
                dependency: name.clone(),
                cluster: cluster.name().to_string(),
            })?;
        resolved.push(dependency);
    }

    for dependency in &resolved {
        debug!(
            addon = %addon.name(),
            dependency = %dependency.name(),
            "waiting for dependency"
        );
        let operation = format!(
            "dependency {} of addon {} ready",
            dependency.name(),
            addon.name()
        );
        poll_until_ready(ctx, interval, &operation, || dependency.ready(ctx, cluster))
            .await
            .map_err(|e| match e {
                Error::ContextDone { source, .. } => Error::DependencyNotReady {
                    addon: addon.name().to_string(),
                    dependency: dependency.name().to_string(),
                    cluster: cluster.name().to_string(),
                    source,
                },
                other => Error::DependencyFailed {
                    addon: addon.name().to_string(),
                    dependency: dependency.name().to_string(),
                    cluster: cluster.name().to_string(),
                    source: Box::new(other),
                },
            })?;
    }

    info!(
        addon = %addon.name(),
        dependencies = ?dependencies,
        "dependencies ready"
    );
    Ok(())
}

//! Tearing down test resources on a real cluster

use std::collections::BTreeMap;
use std::time::Duration;

use ktf_cluster::readiness::{wait_for_namespace_ready, DEFAULT_WORKLOAD_POLL_INTERVAL};
use ktf_cluster::{
    generate_namespace, label_namespace, Cleaner, Cluster, Context, ControlPlane, ObjectRef,
};

use super::helpers::{attach, pause_deployment, test_context};

/// Story: a test creates two namespaces with workloads, then the Cleaner
/// removes everything. Running cleanup again is harmless.
#[tokio::test]
#[ignore = "requires a reachable cluster"]
async fn story_cleaner_removes_namespaces_and_is_idempotent() {
    let cluster = attach().await;
    let ctx = test_context();
    let cp = cluster.control_plane();
    let cleaner = Cleaner::new(cluster.as_ref()).with_concurrency(2);

    let mut namespaces = Vec::new();
    for test in ["TestCleanerA", "TestCleanerB"] {
        let ns = generate_namespace(&ctx, cluster.as_ref(), &cleaner, test)
            .await
            .unwrap();
        let manifest = pause_deployment(&ns, "workload");
        cp.apply_manifest(&manifest).await.unwrap();
        cleaner.add_manifest(manifest);
        namespaces.push(ns);
    }

    label_namespace(
        &ctx,
        cp.as_ref(),
        &namespaces[0],
        &BTreeMap::from([("ktf.io/story".to_string(), "cleaner".to_string())]),
    )
    .await
    .unwrap();

    for ns in &namespaces {
        wait_for_namespace_ready(&ctx, cp.as_ref(), ns, DEFAULT_WORKLOAD_POLL_INTERVAL)
            .await
            .unwrap();
    }

    cleaner.cleanup(&ctx).await.unwrap();
    for ns in &namespaces {
        assert!(cp.get_namespace(ns).await.unwrap().is_none());
    }

    cleaner.cleanup(&ctx).await.unwrap();
}

/// Story: an object recorded for cleanup that was already deleted by the
/// test does not fail teardown.
#[tokio::test]
#[ignore = "requires a reachable cluster"]
async fn story_already_deleted_objects_are_tolerated() {
    let cluster = attach().await;
    let ctx = Context::background().with_timeout(Duration::from_secs(60));
    let cleaner = Cleaner::new(cluster.as_ref());

    cleaner.add(ObjectRef::new("v1", "ConfigMap", "never-created").within("default"));
    cleaner.cleanup(&ctx).await.unwrap();
}

//! Deploying addons onto a real cluster

use std::sync::Arc;

use ktf_cluster::{Addon, Cluster, EnvironmentBuilder, Error, ManifestAddon};

use super::helpers::{attach, pause_deployment, test_context};

/// Story: a platform team deploys a cert issuer and a mesh that depends on
/// it. The mesh only deploys once the issuer's workload is available, and
/// environment cleanup removes both.
#[tokio::test]
#[ignore = "requires a reachable cluster"]
async fn story_dependent_addons_deploy_in_order() {
    let cluster = attach().await;
    let ctx = test_context();
    let suffix = &uuid::Uuid::new_v4().simple().to_string()[..6];
    let issuer_ns = format!("ktf-issuer-{}", suffix);
    let mesh_ns = format!("ktf-mesh-{}", suffix);

    let issuer = ManifestAddon::builder("cert-issuer")
        .with_namespace(&issuer_ns)
        .with_manifest(pause_deployment(&issuer_ns, "issuer"))
        .build()
        .unwrap();
    let mesh = ManifestAddon::builder("mesh")
        .with_namespace(&mesh_ns)
        .with_manifest(pause_deployment(&mesh_ns, "mesh"))
        .with_dependency("cert-issuer")
        .build()
        .unwrap();

    let env = EnvironmentBuilder::new()
        .with_cluster(cluster.clone())
        .with_addon(Arc::new(issuer))
        .with_addon(Arc::new(mesh))
        .build(&ctx)
        .await
        .unwrap();

    env.wait_for_ready(&ctx).await.unwrap();
    let version = env.cluster().version(&ctx).await.unwrap();
    assert!(version.major >= 1);

    env.cleanup(&ctx).await.unwrap();
    assert!(env.cluster().list_addons().is_empty());
}

/// Story: deploying an addon whose dependency was never deployed fails fast
/// and leaves nothing registered.
#[tokio::test]
#[ignore = "requires a reachable cluster"]
async fn story_missing_dependency_fails_fast() {
    let cluster = attach().await;
    let ctx = test_context();

    let mesh: Arc<dyn Addon> = Arc::new(
        ManifestAddon::builder("orphan-mesh")
            .with_dependency("never-deployed")
            .build()
            .unwrap(),
    );
    let err = cluster.deploy_addon(&ctx, mesh).await.unwrap_err();
    assert!(matches!(err, Error::DependencyNotFound { .. }));
    assert!(cluster.get_addon("orphan-mesh").is_none());
}

//! Shared helpers for cluster integration tests

use std::sync::{Arc, Once};
use std::time::Duration;

use ktf_cluster::{Cluster, Context, ExistingCluster};
use ktf_common::telemetry::{init_logging, LoggingConfig};

static LOGGING: Once = Once::new();

/// Generous bound for anything that waits on real workloads
pub const TEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Attach to whatever cluster the environment points at
pub async fn attach() -> Arc<dyn Cluster> {
    LOGGING.call_once(|| {
        let _ = init_logging(LoggingConfig::default());
    });

    let cluster = ExistingCluster::builder()
        .with_name("ktf-integration")
        .infer()
        .build()
        .await
        .expect("a reachable cluster is required for integration tests");
    Arc::new(cluster)
}

/// Context bounded by [`TEST_TIMEOUT`]
pub fn test_context() -> Context {
    Context::background().with_timeout(TEST_TIMEOUT)
}

/// Minimal single-replica Deployment manifest in `namespace`
pub fn pause_deployment(namespace: &str, name: &str) -> String {
    format!(
        r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: {name}
  namespace: {namespace}
spec:
  replicas: 1
  selector:
    matchLabels:
      app: {name}
  template:
    metadata:
      labels:
        app: {name}
    spec:
      containers:
        - name: pause
          image: registry.k8s.io/pause:3.10
"#
    )
}

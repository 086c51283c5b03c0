//! Per-test namespaces

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Namespace;
use kube::api::ObjectMeta;
use tracing::{debug, info};

use ktf_common::retry::{retry_on_conflict, RetryConfig};
use ktf_common::{
    Context, Error, Result, LABEL_MANAGED_BY, LABEL_MANAGED_BY_KTF, TEST_NAMESPACE_LABEL,
};

use crate::cleaner::Cleaner;
use crate::cluster::Cluster;
use crate::control_plane::ControlPlane;

/// Longest valid namespace name (DNS-1123 label)
pub const MAX_NAMESPACE_LEN: usize = 63;

/// Attempts made by [`label_namespace`] before giving up on conflicts
pub const LABEL_CONFLICT_ATTEMPTS: u32 = 5;

const SUFFIX_LEN: usize = 8;

/// Reduce `name` to a DNS-1123 label: lowercase alphanumerics and `-`, no
/// leading/trailing `-`, at most `max_len` characters. Empty input becomes
/// `test`.
pub fn sanitize_name(name: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let mut out: String = out.trim_matches('-').chars().take(max_len).collect();
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        out.push_str("test");
    }
    out
}

/// Create a uniquely named namespace for `test_name` and register it on `cleaner`.
///
/// The name is `<sanitized test name>-<8 hex chars>` and the namespace
/// carries `ktf.io/test=<sanitized test name>`.
pub async fn generate_namespace(
    ctx: &Context,
    cluster: &dyn Cluster,
    cleaner: &Cleaner,
    test_name: &str,
) -> Result<String> {
    let base = sanitize_name(test_name, MAX_NAMESPACE_LEN - SUFFIX_LEN - 1);
    let suffix: String = uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(SUFFIX_LEN)
        .collect();
    let name = format!("{}-{}", base, suffix);

    let namespace = Namespace {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            labels: Some(BTreeMap::from([
                (TEST_NAMESPACE_LABEL.to_string(), base.clone()),
                (LABEL_MANAGED_BY.to_string(), LABEL_MANAGED_BY_KTF.to_string()),
            ])),
            ..Default::default()
        },
        ..Default::default()
    };

    let cp = cluster.control_plane();
    ctx.run(format!("namespace {} created", name), cp.create_namespace(&namespace))
        .await?;
    cleaner.add_namespace(name.clone());

    info!(namespace = %name, test = %test_name, "created test namespace");
    Ok(name)
}

/// Merge `labels` into a namespace's labels.
///
/// Each attempt re-reads the namespace so a conflicting writer's changes are
/// kept; conflicts are retried up to [`LABEL_CONFLICT_ATTEMPTS`] times.
pub async fn label_namespace(
    ctx: &Context,
    cp: &dyn ControlPlane,
    name: &str,
    labels: &BTreeMap<String, String>,
) -> Result<()> {
    let config = RetryConfig::with_max_attempts(LABEL_CONFLICT_ATTEMPTS);
    let operation = format!("label namespace {}", name);
    retry_on_conflict(ctx, &config, &operation, || async {
        let mut namespace = ctx
            .run(operation.clone(), cp.get_namespace(name))
            .await?
            .ok_or_else(|| Error::not_found("Namespace", name))?;
        namespace
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        ctx.run(operation.clone(), cp.replace_namespace(&namespace))
            .await?;
        Ok(())
    })
    .await?;

    debug!(namespace = %name, labels = labels.len(), "labeled namespace");
    Ok(())
}

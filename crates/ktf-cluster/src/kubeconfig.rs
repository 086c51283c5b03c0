//! Temporary kubeconfig files for tools that only take a path

use std::io::Write;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use tempfile::NamedTempFile;
use tracing::debug;

use ktf_common::{Error, Result};

use crate::cluster::Cluster;

/// A kubeconfig written to a temp file owned by the caller.
///
/// The file is removed when this value is dropped or [`closed`](Self::close).
pub struct TempKubeconfig {
    file: NamedTempFile,
}

impl TempKubeconfig {
    /// Write a kubeconfig for `cluster`'s connection descriptor
    pub fn for_cluster(cluster: &dyn Cluster) -> Result<Self> {
        Self::from_config(cluster.name(), cluster.connection())
    }

    /// Write a kubeconfig with a single context named `name`
    pub fn from_config(name: &str, config: &kube::Config) -> Result<Self> {
        let rendered = render_kubeconfig(name, config)?;
        let mut file = tempfile::Builder::new()
            .prefix("ktf-kubeconfig-")
            .suffix(".json")
            .tempfile()
            .map_err(|e| Error::internal_with_context("kubeconfig", e.to_string()))?;
        serde_json::to_writer_pretty(&mut file, &rendered)
            .map_err(|e| Error::serialization(e.to_string()))?;
        file.flush()
            .map_err(|e| Error::internal_with_context("kubeconfig", e.to_string()))?;
        debug!(cluster = %name, path = %file.path().display(), "wrote temporary kubeconfig");
        Ok(Self { file })
    }

    /// Path of the kubeconfig file
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Remove the file now, reporting any error
    pub fn close(self) -> Result<()> {
        self.file
            .close()
            .map_err(|e| Error::internal_with_context("kubeconfig", e.to_string()))
    }
}

fn pem_encode(der: &[u8]) -> String {
    let encoded = STANDARD.encode(der);
    let mut pem = String::from("-----BEGIN CERTIFICATE-----\n");
    for line in encoded.as_bytes().chunks(64) {
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str("-----END CERTIFICATE-----\n");
    pem
}

/// Kubeconfig document for `config` with cluster, user and context all named `name`
pub fn render_kubeconfig(name: &str, config: &kube::Config) -> Result<Value> {
    let mut cluster = json!({ "server": config.cluster_url.to_string() });
    if let Some(certs) = &config.root_cert {
        let bundle: String = certs.iter().map(|der| pem_encode(der)).collect();
        cluster["certificate-authority-data"] = Value::String(STANDARD.encode(bundle));
    }
    if config.accept_invalid_certs {
        cluster["insecure-skip-tls-verify"] = Value::Bool(true);
    }
    if let Some(server_name) = &config.tls_server_name {
        cluster["tls-server-name"] = Value::String(server_name.clone());
    }

    let user = serde_json::to_value(&config.auth_info)
        .map_err(|e| Error::serialization(format!("auth info: {}", e)))?;

    Ok(json!({
        "apiVersion": "v1",
        "kind": "Config",
        "current-context": name,
        "clusters": [{ "name": name, "cluster": cluster }],
        "users": [{ "name": name, "user": user }],
        "contexts": [{
            "name": name,
            "context": {
                "cluster": name,
                "user": name,
                "namespace": config.default_namespace,
            },
        }],
    }))
}
